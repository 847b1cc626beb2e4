//! Hub service: the public surface of the commit, branch and fork graph.
//!
//! A `Hub` owns an injected relational store and blob store. Every mutation
//! runs in one serializable store transaction (retried once on a
//! serialization conflict when configured); reads run read-committed against
//! a single point-in-time copy of the database row.
//!
//! # Usage
//!
//! ```no_run
//! use hubgraph::graph::{DatabaseRef, MemoryBlobStore, Signature};
//! use hubgraph::hub::{Hub, HubConfig, UploadRequest};
//! use hubgraph::store::MemoryStore;
//!
//! let hub = Hub::new(MemoryStore::new(), MemoryBlobStore::new(), HubConfig::default());
//! let db = DatabaseRef::parse("alice", "stats.sqlite").unwrap();
//! let request = UploadRequest::new(db.clone(), Signature::new("Alice", "alice@example.org"));
//! hub.upload(request, &mut &b"SQLite format 3\0"[..]).unwrap();
//! let history = hub.history(&db, &"master".parse().unwrap()).unwrap();
//! ```

mod config;
mod upload;

pub use config::{ConfigError, HubConfig};
pub use upload::{UploadOutcome, UploadRequest};

use chrono::Utc;

use crate::fork::{self, RenderedFork};
use crate::graph::blob::BlobStore;
use crate::graph::commit::{Commit, CommitBuilder};
use crate::graph::error::{GraphError, GraphResult};
use crate::graph::history::HistoryWalker;
use crate::graph::refs::{BranchEntry, BranchLedger, RollbackPlan};
use crate::graph::tree::TreeEntry;
use crate::graph::types::{BranchName, CommitId, ContentHash, DatabaseRef, OwnerName, Signature};
use crate::store::{DatabaseRecord, GraphStore, IsolationLevel, StoreTx};

/// The hub service.
pub struct Hub<S, B> {
    store: S,
    blobs: B,
    config: HubConfig,
}

impl<S: GraphStore, B: BlobStore> Hub<S, B> {
    pub fn new(store: S, blobs: B, config: HubConfig) -> Self {
        Self {
            store,
            blobs,
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Build a commit over `entries`, timestamped now.
    pub fn create_commit(
        &self,
        entries: Vec<TreeEntry>,
        parent: Option<CommitId>,
        author: Signature,
        message: impl Into<String>,
    ) -> GraphResult<Commit> {
        CommitBuilder::new(entries)
            .parent(parent)
            .author(author)
            .message(message)
            .timestamp(Utc::now())
            .build()
    }

    /// Append `commit` to the database and move `branch` to it.
    ///
    /// The commit must re-derive to its own ID and its parent must already be
    /// in the commit list. An unknown branch is created only when
    /// `create_if_missing` is set.
    pub fn push(
        &self,
        db: &DatabaseRef,
        branch: &BranchName,
        commit: &Commit,
        create_if_missing: bool,
    ) -> GraphResult<BranchEntry> {
        commit.verify()?;
        self.mutate(|tx| {
            let mut record = fork::registry::load_live_database(tx, db)?;
            if !create_if_missing && !record.branch_heads.contains(branch) {
                return Err(GraphError::branch_not_found(branch));
            }
            if let Some(parent) = &commit.parent {
                if !record.commit_list.contains(parent) {
                    return Err(GraphError::commit_not_found(parent));
                }
            }

            record.commit_list.insert(commit.clone());
            let entry = record
                .branch_heads
                .advance(branch, commit, &record.commit_list)?
                .clone();
            persist_graph(tx, &record)?;

            tracing::debug!(database = %db, branch = %branch, commit = %commit.id, "commit pushed");
            Ok(entry)
        })
    }

    /// Remove the head commit of `branch`.
    ///
    /// The head moves to its parent, and the commit leaves the commit list
    /// unless another branch still reaches it. Rejected without any change
    /// when the head is the branch's only commit.
    pub fn rollback(&self, db: &DatabaseRef, branch: &BranchName) -> GraphResult<RollbackPlan> {
        self.mutate(|tx| {
            let mut record = fork::registry::load_live_database(tx, db)?;
            let plan = record
                .branch_heads
                .plan_rollback(branch, &record.commit_list)?;
            record
                .branch_heads
                .apply_rollback(&plan, &mut record.commit_list);
            persist_graph(tx, &record)?;

            tracing::debug!(
                database = %db,
                branch = %branch,
                removed = %plan.removed,
                head = %plan.new_head,
                collected = plan.collects_garbage(),
                "branch rolled back"
            );
            Ok(plan)
        })
    }

    /// Commit IDs of `branch`, head first.
    pub fn history(&self, db: &DatabaseRef, branch: &BranchName) -> GraphResult<Vec<CommitId>> {
        let record = self.database(db)?;
        let head = branch_head(&record, branch)?;
        HistoryWalker::new(&record.commit_list).ids_from_head(head)
    }

    /// Full commits of `branch`, head first.
    pub fn history_entries(&self, db: &DatabaseRef, branch: &BranchName) -> GraphResult<Vec<Commit>> {
        let record = self.database(db)?;
        let head = branch_head(&record, branch)?;
        HistoryWalker::new(&record.commit_list)
            .walk(head)
            .map(|c| c.cloned())
            .collect()
    }

    /// Fork `source` into `dest_owner`'s account, returning the root's new fork count.
    pub fn fork(&self, source: &DatabaseRef, dest_owner: &OwnerName) -> GraphResult<u64> {
        let outcome = self.mutate(|tx| fork::fork(tx, source, dest_owner))?;
        Ok(outcome.forks)
    }

    /// The database `db` was forked from.
    pub fn forked_from(&self, db: &DatabaseRef) -> GraphResult<Option<DatabaseRef>> {
        self.read(|tx| fork::forked_from(tx, db))
    }

    /// Display rows of the fork forest `db` belongs to, as seen by `viewer`.
    pub fn render_fork_tree(
        &self,
        db: &DatabaseRef,
        viewer: Option<&OwnerName>,
    ) -> GraphResult<Vec<RenderedFork>> {
        let set = self.read(|tx| fork::fork_set(tx, db))?;
        fork::render_fork_tree(&set.entries, viewer)
    }

    pub fn set_public(&self, db: &DatabaseRef, public: bool) -> GraphResult<()> {
        self.mutate(|tx| {
            let record = fork::registry::load_database(tx, db)?;
            expect_one_row(tx.set_public(record.id, public)?, db, "public");
            Ok(())
        })
    }

    /// Flag `db` as deleted. Its row stays so fork trees keep their shape.
    pub fn mark_deleted(&self, db: &DatabaseRef) -> GraphResult<()> {
        self.mutate(|tx| {
            let record = fork::registry::load_database(tx, db)?;
            expect_one_row(tx.set_deleted(record.id)?, db, "deleted");
            Ok(())
        })
    }

    /// Change the branch new uploads go to by default.
    pub fn set_default_branch(&self, db: &DatabaseRef, branch: &BranchName) -> GraphResult<()> {
        self.mutate(|tx| {
            let record = fork::registry::load_live_database(tx, db)?;
            if !record.branch_heads.contains(branch) {
                return Err(GraphError::branch_not_found(branch));
            }
            expect_one_row(tx.store_default_branch(record.id, branch)?, db, "default_branch");
            Ok(())
        })
    }

    /// A point-in-time copy of the database row.
    pub fn database(&self, db: &DatabaseRef) -> GraphResult<DatabaseRecord> {
        self.read(|tx| fork::registry::load_database(tx, db))
    }

    pub fn branches(&self, db: &DatabaseRef) -> GraphResult<BranchLedger> {
        Ok(self.database(db)?.branch_heads)
    }

    pub fn default_branch(&self, db: &DatabaseRef) -> GraphResult<BranchName> {
        Ok(self.database(db)?.default_branch)
    }

    /// Head commit of the default branch.
    pub fn default_commit(&self, db: &DatabaseRef) -> GraphResult<CommitId> {
        let record = self.database(db)?;
        branch_head(&record, &record.default_branch)
    }

    pub fn commit(&self, db: &DatabaseRef, id: &CommitId) -> GraphResult<Commit> {
        self.database(db)?
            .commit_list
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::commit_not_found(id))
    }

    /// Licence of the data file in commit `id`.
    pub fn commit_licence(&self, db: &DatabaseRef, id: &CommitId) -> GraphResult<Option<ContentHash>> {
        Ok(self.commit(db, id)?.licence())
    }

    /// Check whether commit `id` is the head of `branch` or one of its ancestors.
    pub fn is_commit_in_branch_history(
        &self,
        db: &DatabaseRef,
        branch: &BranchName,
        id: &CommitId,
    ) -> GraphResult<bool> {
        let record = self.database(db)?;
        HistoryWalker::new(&record.commit_list).is_ancestor_of_branch_head(
            id,
            branch,
            &record.branch_heads,
        )
    }

    /// Data file entry and bytes of a commit (the default branch head if `None`).
    pub fn data_file(
        &self,
        db: &DatabaseRef,
        commit: Option<CommitId>,
    ) -> GraphResult<(TreeEntry, Vec<u8>)> {
        let record = self.database(db)?;
        let id = match commit {
            Some(id) => id,
            None => branch_head(&record, &record.default_branch)?,
        };
        let commit = record
            .commit_list
            .get(&id)
            .ok_or_else(|| GraphError::commit_not_found(&id))?;
        let entry = commit
            .tree
            .data_file()
            .ok_or_else(|| GraphError::not_found("data file in commit", id))?
            .clone();
        let bytes = self.blobs.read_verified(&entry.content_hash)?;
        Ok((entry, bytes))
    }

    fn read<T>(&self, f: impl FnOnce(&mut dyn StoreTx) -> GraphResult<T>) -> GraphResult<T> {
        self.store.with_transaction(IsolationLevel::ReadCommitted, f)
    }

    /// run `f` in a serializable transaction, once more after a conflict
    fn mutate<T>(&self, f: impl Fn(&mut dyn StoreTx) -> GraphResult<T>) -> GraphResult<T> {
        match self.store.with_transaction(IsolationLevel::Serializable, &f) {
            Err(err) if err.is_retriable() && self.config.retry_on_conflict => {
                tracing::warn!(error = %err, "transaction conflict, retrying once");
                self.store.with_transaction(IsolationLevel::Serializable, &f)
            }
            result => result,
        }
    }
}

fn branch_head(record: &DatabaseRecord, branch: &BranchName) -> GraphResult<CommitId> {
    record
        .branch_heads
        .get(branch)
        .map(|entry| entry.commit)
        .ok_or_else(|| GraphError::branch_not_found(branch))
}

/// write both graph columns and the recomputed commit count
fn persist_graph(tx: &mut dyn StoreTx, record: &DatabaseRecord) -> GraphResult<()> {
    let db = record.db_ref();
    expect_one_row(tx.store_commit_list(record.id, &record.commit_list)?, &db, "commit_list");
    expect_one_row(tx.store_branch_heads(record.id, &record.branch_heads)?, &db, "branch_heads");
    expect_one_row(tx.refresh_commit_count(record.id)?, &db, "commits");
    Ok(())
}

fn expect_one_row(rows: u64, db: &DatabaseRef, column: &'static str) {
    if rows != 1 {
        tracing::warn!(database = %db, column, rows, "update touched an unexpected number of rows");
    }
}
