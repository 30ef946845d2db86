//! Error types for logging setup

use thiserror::Error;

/// Errors that can occur while building the global subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Log directory or file could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A level or filter directive did not parse
    #[error("Invalid filter: {0}")]
    Filter(String),

    /// Rolling file appender could not be created
    #[error("Appender error: {0}")]
    Appender(String),

    /// A global subscriber is already installed
    #[error("Subscriber init failed: {0}")]
    Init(String),
}

/// Result type alias for logging setup
pub type LoggingResult<T> = Result<T, LoggingError>;
