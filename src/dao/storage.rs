use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another transaction committed a document this one read; the attempt must be replayed.
    #[error("transaction conflict on `{collection}/{key}`")]
    Conflict {
        /// Collection of the contended document.
        collection: String,
        /// Key of the contended document.
        key: String,
    },
    /// The backend could not serve the request.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable description of the failing call.
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A persisted document could not be decoded into its record type.
    #[error("corrupt document `{collection}/{key}`: {message}")]
    Corrupt {
        /// Collection of the unreadable document.
        collection: String,
        /// Key of the unreadable document.
        key: String,
        /// Decoder message.
        message: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a conflict error for the given document.
    pub fn conflict(collection: impl Into<String>, key: impl Into<String>) -> Self {
        StorageError::Conflict {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Whether the failed attempt may be replayed against a fresh snapshot.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}
