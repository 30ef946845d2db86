//! Error types for drover-storage
//!
//! This module defines the error types used throughout the storage crate.

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// On-disk state failed validation
    #[error("Corrupt log file: {0}")]
    Corrupt(String),

    /// Element exceeds the configured maximum element size
    #[error("Element too large (size: {size}, max: {max})")]
    ElementTooLarge { size: usize, max: usize },

    /// Asked to remove more elements than the log holds
    #[error("Cannot remove {requested} elements, log holds {available}")]
    OutOfRange { requested: usize, available: usize },

    /// The log has been closed
    #[error("Log file is closed")]
    Closed,

    /// Write attempted on a log opened read-only
    #[error("Log file is read-only")]
    ReadOnly,

    /// A sealed file with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new Corrupt error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
        assert!(storage_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_corrupt_error() {
        let err = StorageError::corrupt("bad magic");
        assert!(matches!(err, StorageError::Corrupt(_)));
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_element_too_large_display() {
        let err = StorageError::ElementTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "Element too large (size: 20, max: 10)");
    }
}
