// ============================================================================
// Error Handling
// ============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("File error: {0}")]
    FileError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, BusError>;
