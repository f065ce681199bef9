use thiserror::Error;

#[derive(Debug, Error)]
pub enum CovenantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CovenantError {
    /// Short error code string for log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            CovenantError::Config(_) => "CONFIG_ERROR",
            CovenantError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CovenantError>;
