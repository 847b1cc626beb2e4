//! SQLite-backed store.
//!
//! Every transaction opens its own connection, so concurrent callers queue on
//! SQLite's own locking (bounded by the busy timeout) rather than on a shared
//! handle. `commit_list` and `branch_heads` are JSON columns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::fork::ForkEntry;
use crate::graph::commit::CommitList;
use crate::graph::refs::BranchLedger;
use crate::graph::types::{BranchName, DatabaseId, DatabaseName, DatabaseRef, OwnerName};
use crate::store::{
    DatabaseRecord, GraphStore, IsolationLevel, NewDatabase, StoreError, StoreResult, StoreTx,
};

const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS databases (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    owner                TEXT    NOT NULL,
    name                 TEXT    NOT NULL,
    public               INTEGER NOT NULL DEFAULT 0,
    deleted              INTEGER NOT NULL DEFAULT 0,
    forked_from          INTEGER REFERENCES databases (id),
    root_database        INTEGER NOT NULL DEFAULT 0,
    forks                INTEGER NOT NULL DEFAULT 0,
    commits              INTEGER NOT NULL DEFAULT 0,
    default_branch       TEXT    NOT NULL,
    one_line_description TEXT    NOT NULL DEFAULT '',
    source_url           TEXT,
    commit_list          TEXT    NOT NULL DEFAULT '{}',
    branch_heads         TEXT    NOT NULL DEFAULT '{}',
    date_created         TEXT    NOT NULL,
    last_modified        TEXT    NOT NULL,
    UNIQUE (owner, name)
);
CREATE INDEX IF NOT EXISTS databases_root_idx ON databases (root_database);
";

const RECORD_COLUMNS: &str = "id, owner, name, public, deleted, forked_from, root_database, \
     forks, commits, default_branch, one_line_description, source_url, commit_list, \
     branch_heads, date_created, last_modified";

/// Store backed by a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open the store at `path`, creating the file and schema if missing.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = open_connection(&path, true)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "sqlite store opened");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_connection(path: &Path, create: bool) -> StoreResult<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    let conn = Connection::open_with_flags(path, flags)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    Ok(conn)
}

impl GraphStore for SqliteStore {
    fn begin(&self, isolation: IsolationLevel) -> StoreResult<Box<dyn StoreTx + '_>> {
        let conn = open_connection(&self.path, false)?;
        conn.execute_batch(isolation.begin_statement())?;
        Ok(Box::new(SqliteTx {
            conn,
            finished: false,
        }))
    }
}

struct SqliteTx {
    conn: Connection,
    finished: bool,
}

impl SqliteTx {
    fn query_record(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Option<DatabaseRecord>> {
        let sql = format!("SELECT {} FROM databases WHERE {}", RECORD_COLUMNS, filter);
        let raw = self.conn.query_row(&sql, params, RawRecord::from_row).optional()?;
        raw.map(RawRecord::decode).transpose()
    }
}

impl StoreTx for SqliteTx {
    fn load(&mut self, db: &DatabaseRef) -> StoreResult<Option<DatabaseRecord>> {
        self.query_record(
            "owner = ?1 AND name = ?2",
            params![db.owner.as_str(), db.name.as_str()],
        )
    }

    fn load_by_id(&mut self, id: DatabaseId) -> StoreResult<Option<DatabaseRecord>> {
        self.query_record("id = ?1", params![id.get()])
    }

    fn insert_database(&mut self, new: &NewDatabase) -> StoreResult<DatabaseId> {
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO databases (owner, name, public, default_branch, \
                 one_line_description, source_url, commit_list, branch_heads, commits, \
                 date_created, last_modified) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    new.owner.as_str(),
                    new.name.as_str(),
                    new.public,
                    new.default_branch.as_str(),
                    new.one_line_description,
                    new.source_url,
                    serde_json::to_string(&new.commit_list)?,
                    serde_json::to_string(&new.branch_heads)?,
                    new.commit_list.len() as i64,
                    now,
                ],
            )
            .map_err(|e| StoreError::from_insert(e, format!("{}/{}", new.owner, new.name)))?;

        let id = self.conn.last_insert_rowid();
        self.conn.execute(
            "UPDATE databases SET root_database = id WHERE id = ?1",
            params![id],
        )?;
        Ok(DatabaseId::new(id))
    }

    fn fork_database(
        &mut self,
        source: DatabaseId,
        dest_owner: &OwnerName,
    ) -> StoreResult<DatabaseId> {
        let now = timestamp(Utc::now());
        let rows = self
            .conn
            .execute(
                "INSERT INTO databases (owner, name, public, deleted, forked_from, \
                 root_database, forks, commits, default_branch, one_line_description, \
                 source_url, commit_list, branch_heads, date_created, last_modified) \
                 SELECT ?2, name, public, 0, id, root_database, 0, commits, default_branch, \
                 one_line_description, source_url, commit_list, branch_heads, ?3, ?3 \
                 FROM databases WHERE id = ?1",
                params![source.get(), dest_owner.as_str(), now],
            )
            .map_err(|e| StoreError::from_insert(e, format!("{} (fork of {})", dest_owner, source)))?;
        if rows == 0 {
            return Err(StoreError::MissingRow(source));
        }
        Ok(DatabaseId::new(self.conn.last_insert_rowid()))
    }

    fn increment_forks(&mut self, root: DatabaseId) -> StoreResult<u64> {
        let forks: Option<i64> = self
            .conn
            .query_row(
                "UPDATE databases SET forks = forks + 1 WHERE id = ?1 RETURNING forks",
                params![root.get()],
                |row| row.get(0),
            )
            .optional()?;
        let forks = forks.ok_or(StoreError::MissingRow(root))?;
        to_u64("forks", forks)
    }

    fn store_branch_heads(&mut self, id: DatabaseId, heads: &BranchLedger) -> StoreResult<u64> {
        let rows = self.conn.execute(
            "UPDATE databases SET branch_heads = ?2, last_modified = ?3 WHERE id = ?1",
            params![id.get(), serde_json::to_string(heads)?, timestamp(Utc::now())],
        )?;
        Ok(rows as u64)
    }

    fn store_commit_list(&mut self, id: DatabaseId, commits: &CommitList) -> StoreResult<u64> {
        let rows = self.conn.execute(
            "UPDATE databases SET commit_list = ?2, last_modified = ?3 WHERE id = ?1",
            params![id.get(), serde_json::to_string(commits)?, timestamp(Utc::now())],
        )?;
        Ok(rows as u64)
    }

    fn refresh_commit_count(&mut self, id: DatabaseId) -> StoreResult<u64> {
        let rows = self.conn.execute(
            "UPDATE databases \
             SET commits = (SELECT count(*) FROM json_each(databases.commit_list)) \
             WHERE id = ?1",
            params![id.get()],
        )?;
        Ok(rows as u64)
    }

    fn store_default_branch(&mut self, id: DatabaseId, branch: &BranchName) -> StoreResult<u64> {
        let rows = self.conn.execute(
            "UPDATE databases SET default_branch = ?2, last_modified = ?3 WHERE id = ?1",
            params![id.get(), branch.as_str(), timestamp(Utc::now())],
        )?;
        Ok(rows as u64)
    }

    fn set_public(&mut self, id: DatabaseId, public: bool) -> StoreResult<u64> {
        let rows = self.conn.execute(
            "UPDATE databases SET public = ?2, last_modified = ?3 WHERE id = ?1",
            params![id.get(), public, timestamp(Utc::now())],
        )?;
        Ok(rows as u64)
    }

    fn set_deleted(&mut self, id: DatabaseId) -> StoreResult<u64> {
        let rows = self.conn.execute(
            "UPDATE databases SET deleted = 1, last_modified = ?2 WHERE id = ?1",
            params![id.get(), timestamp(Utc::now())],
        )?;
        Ok(rows as u64)
    }

    fn fork_rows(&mut self, root: DatabaseId) -> StoreResult<Vec<ForkEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner, name, forked_from, public, deleted \
             FROM databases WHERE root_database = ?1 ORDER BY id",
        )?;
        let raw = stmt
            .query_map(params![root.get()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, owner, name, forked_from, public, deleted)| {
                Ok(ForkEntry {
                    id: DatabaseId::new(id),
                    owner: decode_name(OwnerName::new(owner))?,
                    name: decode_name(DatabaseName::new(name))?,
                    forked_from: forked_from.map(DatabaseId::new),
                    public,
                    deleted,
                })
            })
            .collect()
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// a row as read from SQLite, before validation
struct RawRecord {
    id: i64,
    owner: String,
    name: String,
    public: bool,
    deleted: bool,
    forked_from: Option<i64>,
    root_database: i64,
    forks: i64,
    commits: i64,
    default_branch: String,
    one_line_description: String,
    source_url: Option<String>,
    commit_list: String,
    branch_heads: String,
    date_created: String,
    last_modified: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            public: row.get(3)?,
            deleted: row.get(4)?,
            forked_from: row.get(5)?,
            root_database: row.get(6)?,
            forks: row.get(7)?,
            commits: row.get(8)?,
            default_branch: row.get(9)?,
            one_line_description: row.get(10)?,
            source_url: row.get(11)?,
            commit_list: row.get(12)?,
            branch_heads: row.get(13)?,
            date_created: row.get(14)?,
            last_modified: row.get(15)?,
        })
    }

    fn decode(self) -> StoreResult<DatabaseRecord> {
        Ok(DatabaseRecord {
            id: DatabaseId::new(self.id),
            owner: decode_name(OwnerName::new(self.owner))?,
            name: decode_name(DatabaseName::new(self.name))?,
            public: self.public,
            deleted: self.deleted,
            forked_from: self.forked_from.map(DatabaseId::new),
            root_database: DatabaseId::new(self.root_database),
            forks: to_u64("forks", self.forks)?,
            commits: to_u64("commits", self.commits)?,
            default_branch: decode_name(BranchName::new(self.default_branch))?,
            one_line_description: self.one_line_description,
            source_url: self.source_url,
            commit_list: serde_json::from_str(&self.commit_list)?,
            branch_heads: serde_json::from_str(&self.branch_heads)?,
            date_created: parse_timestamp(&self.date_created)?,
            last_modified: parse_timestamp(&self.last_modified)?,
        })
    }
}

fn decode_name<T>(name: Result<T, crate::graph::types::InvalidNameError>) -> StoreResult<T> {
    name.map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn to_u64(column: &str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {}: {}", column, value)))
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}
