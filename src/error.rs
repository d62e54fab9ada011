//! Error types for Chronicle

use thiserror::Error;

/// Result type alias for Chronicle operations
pub type Result<T> = std::result::Result<T, ChronicleError>;

/// Main error type for Chronicle
#[derive(Error, Debug)]
pub enum ChronicleError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Record not found: {0}")]
    NotFound(i64),

    #[error("Store busy: write lock contention, retry with backoff")]
    StoreBusy,

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Corrupt embedding index: {0}")]
    CorruptIndex(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for ChronicleError {
    fn from(err: rusqlite::Error) -> Self {
        // SQLITE_BUSY / SQLITE_LOCKED mean the backend could not serialize
        // the write itself; surface as transient contention, not corruption.
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return ChronicleError::StoreBusy;
            }
        }
        ChronicleError::Database(err)
    }
}

impl ChronicleError {
    /// Check if error is safe to retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChronicleError::StoreBusy | ChronicleError::EmbeddingUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_store_busy() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(
            ChronicleError::from(err),
            ChronicleError::StoreBusy
        ));
    }

    #[test]
    fn retryable_classification() {
        assert!(ChronicleError::StoreBusy.is_retryable());
        assert!(ChronicleError::EmbeddingUnavailable("no model".into()).is_retryable());
        assert!(!ChronicleError::NotFound(1).is_retryable());
        assert!(!ChronicleError::Validation("empty".into()).is_retryable());
    }
}
