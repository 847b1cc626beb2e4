//! error types for graph operations
//!
//! every failure a graph operation can surface is one of the `GraphError`
//! kinds below. collaborator failures (relational store, blob store) are
//! carried unchanged inside `Store` and `Blob`.

use thiserror::Error;

use crate::graph::types::{BranchName, CommitId, ContentHash, InvalidNameError};
use crate::store::StoreError;

/// the main error type for graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    /// malformed name, missing field, rejected input
    #[error("validation failed: {0}")]
    Validation(String),

    /// unknown branch, commit or database
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// a parent pointer references a commit missing from the commit list
    #[error("broken commit history: commit {missing} not found (reached from {reached_from})")]
    BrokenHistory {
        missing: CommitId,
        reached_from: String,
    },

    /// the operation would break a graph invariant
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// serialization failure in the relational store, safe to retry once
    #[error("concurrent modification: {0}")]
    ConcurrencyConflict(String),

    /// the fork rows for a root are not a well formed forest
    #[error("malformed fork set: {0}")]
    MalformedForkSet(String),

    /// error from the relational store
    #[error("store error: {0}")]
    Store(StoreError),

    /// error from the blob store
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),
}

impl GraphError {
    pub(crate) fn not_found(kind: &'static str, name: impl ToString) -> Self {
        Self::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn branch_not_found(branch: &BranchName) -> Self {
        Self::not_found("branch", branch)
    }

    pub(crate) fn commit_not_found(commit: &CommitId) -> Self {
        Self::not_found("commit", commit)
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound { .. } | GraphError::Blob(BlobError::NotFound(_)))
    }

    /// check if this error is recoverable by retrying the whole operation
    pub fn is_retriable(&self) -> bool {
        matches!(self, GraphError::ConcurrencyConflict(_))
    }

    /// errors that indicate stored data is corrupt rather than bad input
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            GraphError::BrokenHistory { .. } | GraphError::MalformedForkSet(_)
        )
    }
}

impl From<InvalidNameError> for GraphError {
    fn from(err: InvalidNameError) -> Self {
        GraphError::Validation(err.to_string())
    }
}

impl From<StoreError> for GraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(name) => {
                GraphError::Validation(format!("a database named '{}' already exists", name))
            }
            err if err.is_busy() => GraphError::ConcurrencyConflict(err.to_string()),
            err => GraphError::Store(err),
        }
    }
}

/// errors from a blob store
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(ContentHash),

    /// the stored bytes no longer hash to their address
    #[error("blob {expected} is corrupt (content hashes to {actual})")]
    Corrupt {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;
