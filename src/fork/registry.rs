//! fork registry: lineage between whole database records.
//!
//! every record points at the record it was forked from and at the root of
//! its forest. only the root row's fork counter is ever incremented, and only
//! through the store's atomic increment, so N concurrent forks add exactly N.

use serde::Serialize;

use crate::graph::error::{GraphError, GraphResult};
use crate::graph::types::{DatabaseId, DatabaseName, DatabaseRef, OwnerName};
use crate::store::{DatabaseRecord, StoreTx};

/// lineage view of one database row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForkEntry {
    pub id: DatabaseId,
    pub owner: OwnerName,
    pub name: DatabaseName,
    /// `None` for the root of the forest
    pub forked_from: Option<DatabaseId>,
    pub public: bool,
    pub deleted: bool,
}

/// result of a fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkOutcome {
    pub id: DatabaseId,
    pub root: DatabaseId,
    /// the root's fork counter after this fork
    pub forks: u64,
}

/// all rows of one fork forest, ordered by ID
#[derive(Debug, Clone)]
pub struct ForkSet {
    pub root: DatabaseId,
    pub entries: Vec<ForkEntry>,
}

pub(crate) fn load_database(tx: &mut dyn StoreTx, db: &DatabaseRef) -> GraphResult<DatabaseRecord> {
    tx.load(db)?
        .ok_or_else(|| GraphError::not_found("database", db))
}

/// like `load_database`, but a deleted database counts as missing
pub(crate) fn load_live_database(
    tx: &mut dyn StoreTx,
    db: &DatabaseRef,
) -> GraphResult<DatabaseRecord> {
    let record = load_database(tx, db)?;
    if record.deleted {
        return Err(GraphError::not_found("database", db));
    }
    Ok(record)
}

/// copy `source` into a new database owned by `dest_owner`
pub fn fork(
    tx: &mut dyn StoreTx,
    source: &DatabaseRef,
    dest_owner: &OwnerName,
) -> GraphResult<ForkOutcome> {
    let record = load_live_database(tx, source)?;

    let dest = DatabaseRef::new(dest_owner.clone(), record.name.clone());
    if tx.load(&dest)?.is_some() {
        return Err(GraphError::Validation(format!(
            "'{}' already has a database named '{}'",
            dest_owner, record.name
        )));
    }

    let id = tx.fork_database(record.id, dest_owner)?;
    let forks = tx.increment_forks(record.root_database)?;

    tracing::debug!(source = %source, dest = %dest, root = %record.root_database, forks, "database forked");
    Ok(ForkOutcome {
        id,
        root: record.root_database,
        forks,
    })
}

/// the database `db` was forked from, `None` for a root
pub fn forked_from(tx: &mut dyn StoreTx, db: &DatabaseRef) -> GraphResult<Option<DatabaseRef>> {
    let record = load_database(tx, db)?;
    let Some(parent_id) = record.forked_from else {
        return Ok(None);
    };
    match tx.load_by_id(parent_id)? {
        Some(parent) => Ok(Some(parent.db_ref())),
        None => {
            tracing::error!(database = %db, parent = %parent_id, "fork parent row missing");
            Err(GraphError::not_found("database", parent_id))
        }
    }
}

/// every row in the forest `db` belongs to
pub fn fork_set(tx: &mut dyn StoreTx, db: &DatabaseRef) -> GraphResult<ForkSet> {
    let record = load_database(tx, db)?;
    let entries = tx.fork_rows(record.root_database)?;
    Ok(ForkSet {
        root: record.root_database,
        entries,
    })
}
