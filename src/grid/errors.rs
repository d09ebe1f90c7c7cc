//! Grid-specific error types

use thiserror::Error;

/// Errors that can occur in grid trading operations
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("Invalid grid configuration: {0}")]
    InvalidConfig(String),

    #[error("Illegal transition for level {level_id}: {reason}")]
    IllegalTransition { level_id: u32, reason: String },

    #[error("Grid level not found: id {0}")]
    LevelNotFound(u32),

    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Order rejected by venue: {0}")]
    OrderRejected(String),

    #[error("Order placement failed after {attempts} attempts: {reason}")]
    OrderPlacementFailed { attempts: u32, reason: String },

    #[error("Daily loss limit exceeded: loss {loss:.4} >= limit {limit:.4}")]
    DailyLossLimitExceeded { loss: f64, limit: f64 },

    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GridError {
    /// Fatal errors stop the scheduler; everything else is absorbed at the tick boundary
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GridError::InvalidConfig(_) | GridError::DailyLossLimitExceeded { .. }
        )
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for GridError {
    fn from(err: reqwest::Error) -> Self {
        GridError::Execution(err.to_string())
    }
}

impl From<config::ConfigError> for GridError {
    fn from(err: config::ConfigError) -> Self {
        GridError::Config(err.to_string())
    }
}

/// Result type for grid operations
pub type GridResult<T> = std::result::Result<T, GridError>;
