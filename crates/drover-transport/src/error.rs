//! Error types for the HTTP transport

use thiserror::Error;

use drover_pipeline::PipelineError;
use drover_storage::StorageError;

/// Errors that can occur while delivering a batch over HTTP
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request could not be completed (connect, timeout, protocol)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Batch files could not be read into a payload
    #[error("Payload error: {0}")]
    Payload(String),

    /// Invalid sender configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

impl From<StorageError> for TransportError {
    fn from(e: StorageError) -> Self {
        TransportError::Payload(e.to_string())
    }
}

impl From<TransportError> for PipelineError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Config(message) => PipelineError::Config(message),
            other => PipelineError::Delivery(other.to_string()),
        }
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_to_pipeline_error() {
        let err: PipelineError = TransportError::Http("timed out".to_string()).into();
        assert!(matches!(err, PipelineError::Delivery(_)));
        assert!(err.to_string().contains("timed out"));

        let err: PipelineError = TransportError::Config("no endpoint".to_string()).into();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
