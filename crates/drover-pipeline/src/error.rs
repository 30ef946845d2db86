//! Error types for the event pipeline

use thiserror::Error;

use drover_storage::StorageError;

/// Errors that can occur while recording or delivering events
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Event could not be turned into bytes; it is dropped, never retried
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Disk write, seal or move failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Sender failed to deliver a batch
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The pipeline worker is no longer running
    #[error("Pipeline closed")]
    Closed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
