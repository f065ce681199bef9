use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use covenant_core::config::CovenantConfig;
use covenant_scheduler::{ChannelSink, EventSink, LogSink, Scheduler, SchedulerOptions};
use covenant_subscriptions::{SqliteStore, SubscriptionRegistry};
use tracing::info;

mod app;
mod http;

#[derive(Parser)]
#[command(
    name = "covenant-gateway",
    version,
    about = "Subscription scheduling service"
)]
struct Cli {
    /// Config file (falls back to COVENANT_CONFIG, then ~/.covenant/covenant.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen port from config
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "covenant_gateway=info,covenant_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: explicit path > COVENANT_CONFIG env > ~/.covenant/covenant.toml
    let config_path = cli.config.or_else(|| std::env::var("COVENANT_CONFIG").ok());
    let mut config = CovenantConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        CovenantConfig::default()
    });
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let db_path = &config.database.path;
    config.database.ensure_parent_dir()?;
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store = SqliteStore::new(db)?;
    info!("database migrations complete");

    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(store)));

    // Fulfillment channel: Scheduler → delivery task
    let (sink, mut fired_rx) = ChannelSink::channel(config.scheduler.event_buffer);
    let scheduler = Scheduler::new(
        Arc::clone(&registry),
        Arc::new(sink),
        SchedulerOptions::from(&config.scheduler),
    );

    // Delivery lives outside this service; events are logged until a
    // downstream consumer is wired in.
    tokio::spawn(async move {
        let delivery = LogSink;
        while let Some(event) = fired_rx.recv().await {
            if let Err(e) = delivery.emit(&event).await {
                tracing::warn!(subscription_id = %event.subscription_id, "delivery failed: {e}");
            }
        }
    });

    // spawn scheduler loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let background = scheduler.clone();
    tokio::spawn(async move { background.run(shutdown_rx).await });

    let state = Arc::new(app::AppState::new(config, registry, scheduler));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Covenant gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}
