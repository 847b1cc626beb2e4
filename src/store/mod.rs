//! Relational store collaborator.
//!
//! The graph keeps one row per hosted database. Each row carries the root
//! metadata (owner, visibility, fork lineage, fork counter) plus the two
//! graph columns: the append-only `commit_list` and the `branch_heads` ledger.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 GraphStore                   │
//! │      (opens transactions, owns storage)      │
//! └──────────────────────────────────────────────┘
//!                       │ begin(isolation)
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │                  StoreTx                     │
//! │  (row reads/writes, commit / rollback)       │
//! └──────────────────────────────────────────────┘
//!          │                          │
//!          ▼                          ▼
//!   ┌─────────────┐            ┌─────────────┐
//!   │ MemoryStore │            │ SqliteStore │
//!   └─────────────┘            └─────────────┘
//! ```
//!
//! Graph components never hold a store of their own: the store is injected
//! into `Hub` at startup and every operation runs inside
//! `GraphStore::with_transaction`.

mod error;
mod isolation;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use isolation::IsolationLevel;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::fork::ForkEntry;
use crate::graph::commit::CommitList;
use crate::graph::error::GraphResult;
use crate::graph::refs::BranchLedger;
use crate::graph::types::{BranchName, DatabaseId, DatabaseName, DatabaseRef, OwnerName};

/// A database row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseRecord {
    pub id: DatabaseId,
    pub owner: OwnerName,
    pub name: DatabaseName,
    pub public: bool,
    pub deleted: bool,
    pub forked_from: Option<DatabaseId>,
    /// root of this record's fork forest (its own ID for a root)
    pub root_database: DatabaseId,
    /// only meaningful on the root row
    pub forks: u64,
    /// number of distinct commits in `commit_list`
    pub commits: u64,
    pub default_branch: BranchName,
    pub one_line_description: String,
    pub source_url: Option<String>,
    #[serde(skip)]
    pub commit_list: CommitList,
    pub branch_heads: BranchLedger,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl DatabaseRecord {
    pub fn db_ref(&self) -> DatabaseRef {
        DatabaseRef::new(self.owner.clone(), self.name.clone())
    }

    pub fn is_root(&self) -> bool {
        self.forked_from.is_none()
    }

    /// the row as the fork registry sees it
    pub fn fork_entry(&self) -> ForkEntry {
        ForkEntry {
            id: self.id,
            owner: self.owner.clone(),
            name: self.name.clone(),
            forked_from: self.forked_from,
            public: self.public,
            deleted: self.deleted,
        }
    }
}

/// Values for a brand new root database row.
#[derive(Debug, Clone)]
pub struct NewDatabase {
    pub owner: OwnerName,
    pub name: DatabaseName,
    pub public: bool,
    pub default_branch: BranchName,
    pub one_line_description: String,
    pub source_url: Option<String>,
    pub commit_list: CommitList,
    pub branch_heads: BranchLedger,
}

impl NewDatabase {
    pub fn new(db: &DatabaseRef, default_branch: BranchName) -> Self {
        Self {
            owner: db.owner.clone(),
            name: db.name.clone(),
            public: false,
            default_branch,
            one_line_description: String::new(),
            source_url: None,
            commit_list: CommitList::new(),
            branch_heads: BranchLedger::new(),
        }
    }
}

/// One open transaction.
///
/// Writes return the number of rows they touched so callers can spot an
/// update that matched nothing. Dropping a transaction without calling
/// `commit` discards all of its writes.
pub trait StoreTx {
    fn load(&mut self, db: &DatabaseRef) -> StoreResult<Option<DatabaseRecord>>;

    fn load_by_id(&mut self, id: DatabaseId) -> StoreResult<Option<DatabaseRecord>>;

    /// insert a root row (its own fork root) and return its ID
    fn insert_database(&mut self, new: &NewDatabase) -> StoreResult<DatabaseId>;

    /// copy `source` into a new row owned by `dest_owner`, linked as its fork
    fn fork_database(&mut self, source: DatabaseId, dest_owner: &OwnerName)
        -> StoreResult<DatabaseId>;

    /// atomically bump the fork counter of `root` and return the new value
    fn increment_forks(&mut self, root: DatabaseId) -> StoreResult<u64>;

    fn store_branch_heads(&mut self, id: DatabaseId, heads: &BranchLedger) -> StoreResult<u64>;

    fn store_commit_list(&mut self, id: DatabaseId, commits: &CommitList) -> StoreResult<u64>;

    /// set `commits` to the number of keys currently in `commit_list`
    fn refresh_commit_count(&mut self, id: DatabaseId) -> StoreResult<u64>;

    fn store_default_branch(&mut self, id: DatabaseId, branch: &BranchName) -> StoreResult<u64>;

    fn set_public(&mut self, id: DatabaseId, public: bool) -> StoreResult<u64>;

    fn set_deleted(&mut self, id: DatabaseId) -> StoreResult<u64>;

    /// every row sharing `root`, ordered by ID
    fn fork_rows(&mut self, root: DatabaseId) -> StoreResult<Vec<ForkEntry>>;

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// The persistent relational collaborator.
pub trait GraphStore: Send + Sync {
    fn begin(&self, isolation: IsolationLevel) -> StoreResult<Box<dyn StoreTx + '_>>;

    /// Execute a function within a transaction, committing on `Ok`.
    ///
    /// If the function returns `Err` or panics, the transaction is rolled
    /// back and none of its writes become visible.
    fn with_transaction<T, F>(&self, isolation: IsolationLevel, f: F) -> GraphResult<T>
    where
        Self: Sized,
        F: FnOnce(&mut dyn StoreTx) -> GraphResult<T>,
    {
        let tx_id = Ulid::new().to_string().to_lowercase();
        let span = tracing::debug_span!("tx", id = %tx_id, isolation = %isolation);
        let _entered = span.enter();

        let mut tx = self.begin(isolation)?;
        match f(tx.as_mut()) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
