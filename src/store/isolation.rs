//! Transaction isolation levels.
//!
//! The store supports two levels:
//! - ReadCommitted: each read sees the latest committed state
//! - Serializable: the transaction behaves as if it ran alone

use std::fmt;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read Committed isolation.
    ///
    /// Enough for reads and for single-statement atomic updates such as the
    /// fork counter increment.
    #[default]
    ReadCommitted,

    /// Serializable isolation.
    ///
    /// Required when a transaction reads `branch_heads` / `commit_list` and
    /// writes back a value derived from them (push, rollback), so a concurrent
    /// writer can't interleave between the read and the write.
    Serializable,
}

impl IsolationLevel {
    /// Statement that opens a SQLite transaction at this level.
    pub(crate) fn begin_statement(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "BEGIN DEFERRED",
            IsolationLevel::Serializable => "BEGIN IMMEDIATE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_isolation() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_begin_statement() {
        assert_eq!(IsolationLevel::ReadCommitted.begin_statement(), "BEGIN DEFERRED");
        assert_eq!(IsolationLevel::Serializable.begin_statement(), "BEGIN IMMEDIATE");
    }

    #[test]
    fn test_display() {
        assert_eq!(IsolationLevel::ReadCommitted.to_string(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.to_string(), "SERIALIZABLE");
    }
}
