//! Error types for Maestro

use thiserror::Error;

use crate::executor::ChainExhaustedReport;

/// Result type alias using Maestro's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Maestro error types
///
/// Provider-level failures (auth, rate limit, bad request) never surface here
/// directly: the fallback executor converts them into structured attempt
/// records. Only terminal conditions escape as `Error`.
#[derive(Error, Debug)]
pub enum Error {
    // Registry errors (E100-E199)
    #[error("Registry load rejected: {0}")]
    RegistryLoad(String),

    #[error("Model '{0}' not found in registry")]
    ModelNotFound(String),

    // Task analysis errors (E200-E299)
    #[error("Unknown task type '{0}'")]
    UnknownTaskType(String),

    // Selection errors (E300-E399)
    #[error("No suitable model for task type '{0}'")]
    NoSuitableModel(String),

    // Dispatch errors (E400-E499)
    #[error("Fallback chain exhausted after {} attempt(s)", .0.attempts.len())]
    ChainExhausted(Box<ChainExhaustedReport>),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Network errors (E700-E799)
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::RegistryLoad(_) => "E100",
            Self::ModelNotFound(_) => "E101",
            Self::UnknownTaskType(_) => "E200",
            Self::NoSuitableModel(_) => "E300",
            Self::ChainExhausted(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E601",
            Self::NetworkError(_) => "E700",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }
}
