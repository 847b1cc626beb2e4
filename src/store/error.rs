//! Relational store error types.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::graph::types::DatabaseId;

/// Result type for relational store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a relational store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store could not serialize this transaction against another one.
    #[error("store is busy: {0}")]
    Busy(String),

    /// A stored row doesn't decode into a valid record.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// An owner already has a database of this name.
    #[error("database already exists: {0}")]
    Duplicate(String),

    /// A row addressed by ID doesn't exist.
    #[error("no database row with id {0}")]
    MissingRow(DatabaseId),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Check if the failure came from lock contention and the work can be retried.
    pub fn is_busy(&self) -> bool {
        match self {
            StoreError::Busy(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Map a unique-constraint failure on insert to `Duplicate`.
    pub(crate) fn from_insert(err: rusqlite::Error, name: impl Into<String>) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
                StoreError::Duplicate(name.into())
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_detection() {
        assert!(StoreError::Busy("writer active".into()).is_busy());

        let locked = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(StoreError::Sqlite(locked).is_busy());

        assert!(!StoreError::Corrupt("bad".into()).is_busy());
        assert!(!StoreError::MissingRow(DatabaseId::new(3)).is_busy());
    }

    #[test]
    fn test_constraint_maps_to_duplicate() {
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        let err = StoreError::from_insert(constraint, "bob/stats.sqlite");
        assert!(matches!(err, StoreError::Duplicate(name) if name == "bob/stats.sqlite"));
    }
}
