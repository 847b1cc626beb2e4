//! In-memory store.
//!
//! Committed state sits behind an `RwLock`. A transaction takes the writer
//! mutex for its whole lifetime and works on a staged copy of the tables,
//! which replaces the committed state only on `commit`. Transactions are
//! therefore serializable whatever level they ask for.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::fork::ForkEntry;
use crate::graph::commit::CommitList;
use crate::graph::refs::BranchLedger;
use crate::graph::types::{BranchName, DatabaseId, DatabaseRef, OwnerName};
use crate::store::{
    DatabaseRecord, GraphStore, IsolationLevel, NewDatabase, StoreError, StoreResult, StoreTx,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<DatabaseId, DatabaseRecord>,
    last_id: i64,
}

impl Tables {
    fn find(&self, db: &DatabaseRef) -> Option<&DatabaseRecord> {
        self.rows
            .values()
            .find(|r| r.owner == db.owner && r.name == db.name)
    }

    fn next_id(&mut self) -> DatabaseId {
        self.last_id += 1;
        DatabaseId::new(self.last_id)
    }

    /// apply `f` to a row, returning rows affected
    fn update(&mut self, id: DatabaseId, f: impl FnOnce(&mut DatabaseRecord)) -> u64 {
        match self.rows.get_mut(&id) {
            Some(row) => {
                f(row);
                row.last_modified = Utc::now();
                1
            }
            None => 0,
        }
    }
}

/// Store kept entirely in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: RwLock<Tables>,
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for MemoryStore {
    fn begin(&self, _isolation: IsolationLevel) -> StoreResult<Box<dyn StoreTx + '_>> {
        let guard = self.writer.lock();
        let staged = self.committed.read().clone();
        Ok(Box::new(MemoryTx {
            store: self,
            staged,
            _guard: guard,
        }))
    }
}

struct MemoryTx<'a> {
    store: &'a MemoryStore,
    staged: Tables,
    _guard: MutexGuard<'a, ()>,
}

impl StoreTx for MemoryTx<'_> {
    fn load(&mut self, db: &DatabaseRef) -> StoreResult<Option<DatabaseRecord>> {
        Ok(self.staged.find(db).cloned())
    }

    fn load_by_id(&mut self, id: DatabaseId) -> StoreResult<Option<DatabaseRecord>> {
        Ok(self.staged.rows.get(&id).cloned())
    }

    fn insert_database(&mut self, new: &NewDatabase) -> StoreResult<DatabaseId> {
        let db = DatabaseRef::new(new.owner.clone(), new.name.clone());
        if self.staged.find(&db).is_some() {
            return Err(StoreError::Duplicate(db.to_string()));
        }

        let id = self.staged.next_id();
        let now = Utc::now();
        self.staged.rows.insert(
            id,
            DatabaseRecord {
                id,
                owner: new.owner.clone(),
                name: new.name.clone(),
                public: new.public,
                deleted: false,
                forked_from: None,
                root_database: id,
                forks: 0,
                commits: new.commit_list.len() as u64,
                default_branch: new.default_branch.clone(),
                one_line_description: new.one_line_description.clone(),
                source_url: new.source_url.clone(),
                commit_list: new.commit_list.clone(),
                branch_heads: new.branch_heads.clone(),
                date_created: now,
                last_modified: now,
            },
        );
        Ok(id)
    }

    fn fork_database(
        &mut self,
        source: DatabaseId,
        dest_owner: &OwnerName,
    ) -> StoreResult<DatabaseId> {
        let source = self
            .staged
            .rows
            .get(&source)
            .cloned()
            .ok_or(StoreError::MissingRow(source))?;
        let dest = DatabaseRef::new(dest_owner.clone(), source.name.clone());
        if self.staged.find(&dest).is_some() {
            return Err(StoreError::Duplicate(dest.to_string()));
        }

        let id = self.staged.next_id();
        let now = Utc::now();
        let fork = DatabaseRecord {
            id,
            owner: dest_owner.clone(),
            deleted: false,
            forked_from: Some(source.id),
            forks: 0,
            date_created: now,
            last_modified: now,
            ..source
        };
        self.staged.rows.insert(id, fork);
        Ok(id)
    }

    fn increment_forks(&mut self, root: DatabaseId) -> StoreResult<u64> {
        let row = self
            .staged
            .rows
            .get_mut(&root)
            .ok_or(StoreError::MissingRow(root))?;
        row.forks += 1;
        Ok(row.forks)
    }

    fn store_branch_heads(&mut self, id: DatabaseId, heads: &BranchLedger) -> StoreResult<u64> {
        Ok(self.staged.update(id, |r| r.branch_heads = heads.clone()))
    }

    fn store_commit_list(&mut self, id: DatabaseId, commits: &CommitList) -> StoreResult<u64> {
        Ok(self.staged.update(id, |r| r.commit_list = commits.clone()))
    }

    fn refresh_commit_count(&mut self, id: DatabaseId) -> StoreResult<u64> {
        Ok(self
            .staged
            .update(id, |r| r.commits = r.commit_list.len() as u64))
    }

    fn store_default_branch(&mut self, id: DatabaseId, branch: &BranchName) -> StoreResult<u64> {
        Ok(self.staged.update(id, |r| r.default_branch = branch.clone()))
    }

    fn set_public(&mut self, id: DatabaseId, public: bool) -> StoreResult<u64> {
        Ok(self.staged.update(id, |r| r.public = public))
    }

    fn set_deleted(&mut self, id: DatabaseId) -> StoreResult<u64> {
        Ok(self.staged.update(id, |r| r.deleted = true))
    }

    fn fork_rows(&mut self, root: DatabaseId) -> StoreResult<Vec<ForkEntry>> {
        Ok(self
            .staged
            .rows
            .values()
            .filter(|r| r.root_database == root)
            .map(DatabaseRecord::fork_entry)
            .collect())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { store, staged, _guard } = *self;
        *store.committed.write() = staged;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests as scenarios;

    #[test]
    fn test_insert_and_load() {
        scenarios::check_insert_and_load(&MemoryStore::new());
    }

    #[test]
    fn test_duplicate_name() {
        scenarios::check_duplicate_name(&MemoryStore::new());
    }

    #[test]
    fn test_error_rolls_back() {
        scenarios::check_error_rolls_back(&MemoryStore::new());
    }

    #[test]
    fn test_graph_columns() {
        scenarios::check_graph_columns(&MemoryStore::new());
    }

    #[test]
    fn test_fork_rows() {
        scenarios::check_fork_rows(&MemoryStore::new());
    }

    #[test]
    fn test_flags() {
        scenarios::check_flags(&MemoryStore::new());
    }

    #[test]
    fn test_writers_are_serialized() {
        let store = MemoryStore::new();
        let root = scenarios::seeded(&store, "alice", "stats.sqlite");
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    store
                        .with_transaction(IsolationLevel::ReadCommitted, |tx| {
                            Ok(tx.increment_forks(root)?)
                        })
                        .unwrap();
                });
            }
        });
        let record = store
            .with_transaction(IsolationLevel::ReadCommitted, |tx| Ok(tx.load_by_id(root)?))
            .unwrap()
            .unwrap();
        assert_eq!(record.forks, 8);
    }
}
