use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_BATCH_LIMIT: usize = 100;
pub const DEFAULT_TICK_DEADLINE_MS: u64 = 10_000;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Top-level config (covenant.toml + COVENANT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CovenantConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub paging: PagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// Create the directory that will hold the database file.
    pub fn ensure_parent_dir(&self) -> crate::error::Result<()> {
        if let Some(parent) = std::path::Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Tick driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between automatic ticks. `0` disables the background loop;
    /// ticks then only happen through the manual trigger.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Maximum number of due subscriptions pulled per tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Wall-clock budget for one tick. Unprocessed candidates roll over.
    #[serde(default = "default_tick_deadline_ms")]
    pub tick_deadline_ms: u64,
    /// Capacity of the fulfillment event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            batch_limit: DEFAULT_BATCH_LIMIT,
            tick_deadline_ms: DEFAULT_TICK_DEADLINE_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagingConfig {
    #[serde(default = "default_page_limit")]
    pub default_limit: usize,
    #[serde(default = "max_page_limit")]
    pub max_limit: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}
fn default_tick_deadline_ms() -> u64 {
    DEFAULT_TICK_DEADLINE_MS
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}
fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}
fn max_page_limit() -> usize {
    MAX_PAGE_LIMIT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.covenant/covenant.db", home)
}

impl CovenantConfig {
    /// Load config from a TOML file with COVENANT_* env var overrides.
    ///
    /// A missing file is not an error; every field has a default.
    /// Nested keys use a double underscore, e.g.
    /// `COVENANT_SCHEDULER__BATCH_LIMIT=50`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CovenantConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COVENANT_").split("__"))
            .extract()
            .map_err(|e| crate::error::CovenantError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.covenant/covenant.toml", home)
}
