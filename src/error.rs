//! Error types for the session and dataset lifecycle core.
//!
//! The caller-visible taxonomy (`ServiceError`) keeps every failure kind
//! distinguishable: client behavior differs per kind (retry vs. re-ingest vs.
//! pick another label), so nothing is collapsed into a generic error.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Dataset store adapter errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error while reading a source file or writing an export
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source file could not be recognized as a spatial dataset
    #[error("Unreadable spatial file: {0}")]
    UnreadableFile(String),

    /// CRS information is required and could not be recovered from the file
    #[error("CRS not found in source file; supply one explicitly")]
    CrsNotFound,

    /// The referenced storage object does not exist
    #[error("Storage object not found: {0}")]
    ObjectNotFound(String),

    /// The requested export format is not supported by the store
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

/// Geometry engine adapter errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The operation name is not known to the catalog
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// A required parameter is missing or has the wrong shape
    #[error("Invalid parameter for '{operation}': {reason}")]
    InvalidParameter { operation: String, reason: String },

    /// The engine failed while executing the operation
    #[error("Operation '{operation}' failed: {reason}")]
    Failed { operation: String, reason: String },
}

/// Caller-visible errors of the session and dataset lifecycle core.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// No live session is associated with the presented token
    #[error("Session not found")]
    SessionNotFound,

    /// No dataset with the given label exists in the session
    #[error("Dataset with label '{0}' not found")]
    DatasetNotFound(String),

    /// No explicit label was given and the session has no active dataset
    #[error("No active dataset found")]
    NoActiveDataset,

    /// The label is already taken in this session
    #[error("Label '{0}' already exists in this session")]
    LabelConflict(String),

    /// The geometry engine rejected or failed the operation
    #[error(transparent)]
    Operation(#[from] EngineError),

    /// The operation exceeded the configured time limit
    #[error("Operation '{operation}' timed out after {elapsed:?}")]
    OperationTimeout {
        operation: String,
        elapsed: Duration,
    },

    /// The dataset store failed during materialize/drop/export
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Working or output directory handling failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configured session limit was reached
    #[error("Maximum number of sessions ({0}) exceeded")]
    TooManySessions(usize),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_distinguishable() {
        let not_found = ServiceError::DatasetNotFound("roads".to_string());
        assert_eq!(not_found.to_string(), "Dataset with label 'roads' not found");

        let conflict = ServiceError::LabelConflict("roads".to_string());
        assert!(conflict.to_string().contains("already exists"));

        let no_active = ServiceError::NoActiveDataset;
        assert_eq!(no_active.to_string(), "No active dataset found");
    }

    #[test]
    fn test_storage_error_wraps_into_service_error() {
        let err: ServiceError = StorageError::ObjectNotFound("ds_1".to_string()).into();
        assert!(matches!(
            err,
            ServiceError::Storage(StorageError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_engine_error_wraps_into_service_error() {
        let err: ServiceError = EngineError::UnknownOperation("teleport".to_string()).into();
        assert!(matches!(err, ServiceError::Operation(_)));
        assert_eq!(err.to_string(), "Unknown operation: teleport");
    }

    #[test]
    fn test_timeout_carries_operation_name() {
        let err = ServiceError::OperationTimeout {
            operation: "buffer".to_string(),
            elapsed: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("buffer"));
    }
}
