//! Upload flow: raw bytes in, new commit on a branch out.
//!
//! The bytes are spooled to a temporary file and size-checked, then go to the
//! blob store, hashed while they stream. Only then does the graph transaction
//! open, so it never waits on a large transfer. Rejected uploads leave
//! nothing in the blob store.

use std::io::{self, Read, Seek, SeekFrom};

use chrono::{DateTime, Utc};

use crate::graph::blob::{BlobStore, StoredBlob};
use crate::graph::commit::{Commit, CommitBuilder, CommitMessage};
use crate::graph::error::{BlobError, GraphError, GraphResult};
use crate::graph::tree::TreeEntry;
use crate::graph::types::{BranchName, CommitId, ContentHash, DatabaseRef, Signature};
use crate::hub::{persist_graph, Hub};
use crate::store::{DatabaseRecord, GraphStore, NewDatabase, StoreTx};

/// An upload of a new version of a database file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub db: DatabaseRef,
    pub author: Signature,
    pub committer: Option<Signature>,
    /// defaults to the database's default branch
    pub branch: Option<BranchName>,
    /// defaults to the branch head
    pub parent: Option<CommitId>,
    /// allow `branch` to be created, starting from `parent`
    pub create_branch: bool,
    pub message: Option<String>,
    /// licence name, resolved through the configured licences
    pub licence: Option<String>,
    pub public: bool,
    pub one_line_description: String,
    pub source_url: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl UploadRequest {
    pub fn new(db: DatabaseRef, author: Signature) -> Self {
        Self {
            db,
            author,
            committer: None,
            branch: None,
            parent: None,
            create_branch: false,
            message: None,
            licence: None,
            public: false,
            one_line_description: String::new(),
            source_url: None,
            last_modified: None,
        }
    }

    pub fn branch(mut self, branch: BranchName) -> Self {
        self.branch = Some(branch);
        self
    }

    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn create_branch(mut self, value: bool) -> Self {
        self.create_branch = value;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn licence(mut self, name: impl Into<String>) -> Self {
        self.licence = Some(name.into());
        self
    }

    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn public(mut self, value: bool) -> Self {
        self.public = value;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.one_line_description = text.into();
        self
    }

    pub fn source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn last_modified(mut self, ts: DateTime<Utc>) -> Self {
        self.last_modified = Some(ts);
        self
    }
}

/// What an upload produced.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub commit: Commit,
    pub branch: BranchName,
    pub size: u64,
    pub created_database: bool,
}

impl<S: GraphStore, B: BlobStore> Hub<S, B> {
    /// Store `data` and commit it as the next version of `request.db`.
    ///
    /// A database that doesn't exist yet is created as its own fork root.
    pub fn upload(&self, request: UploadRequest, data: &mut dyn Read) -> GraphResult<UploadOutcome> {
        let licence = request
            .licence
            .as_deref()
            .map(|name| {
                self.config.licence_hash(name).ok_or_else(|| {
                    GraphError::Validation(format!("unknown licence '{}'", name))
                })
            })
            .transpose()?;

        let max = self.config.max_upload_bytes;
        let mut spool = tempfile::tempfile().map_err(BlobError::from)?;
        let size = io::copy(&mut data.take(max.saturating_add(1)), &mut spool)
            .map_err(BlobError::from)?;
        if size == 0 {
            return Err(GraphError::Validation("upload is empty".into()));
        }
        if size > max {
            return Err(GraphError::Validation(format!(
                "upload is larger than the {} byte limit",
                max
            )));
        }
        spool.seek(SeekFrom::Start(0)).map_err(BlobError::from)?;
        let stored = self.blobs.put(&mut spool)?;
        let modified = request.last_modified.unwrap_or_else(Utc::now);

        let outcome = self.mutate(|tx| match tx.load(&request.db)? {
            Some(record) if record.deleted => Err(GraphError::not_found("database", &request.db)),
            Some(record) => self.upload_version(tx, record, &request, stored, licence, modified),
            None => self.upload_new(tx, &request, stored, licence, modified),
        })?;

        tracing::debug!(
            database = %request.db,
            branch = %outcome.branch,
            commit = %outcome.commit.id,
            size = outcome.size,
            created = outcome.created_database,
            "upload committed"
        );
        Ok(outcome)
    }

    fn upload_version(
        &self,
        tx: &mut dyn StoreTx,
        mut record: DatabaseRecord,
        request: &UploadRequest,
        stored: StoredBlob,
        licence: Option<ContentHash>,
        modified: DateTime<Utc>,
    ) -> GraphResult<UploadOutcome> {
        let branch = request
            .branch
            .clone()
            .unwrap_or_else(|| record.default_branch.clone());
        let exists = record.branch_heads.contains(&branch);
        if !exists && !request.create_branch {
            return Err(GraphError::branch_not_found(&branch));
        }

        let parent = match (request.parent, record.branch_heads.get(&branch)) {
            (Some(parent), _) => parent,
            (None, Some(head)) => head.commit,
            (None, None) => {
                return Err(GraphError::Validation(format!(
                    "new branch '{}' needs a parent commit",
                    branch
                )))
            }
        };
        let previous = record
            .commit_list
            .get(&parent)
            .ok_or_else(|| GraphError::commit_not_found(&parent))?
            .licence();

        let licence = licence.or(previous);
        let message = match &request.message {
            Some(message) => message.clone(),
            None if licence != previous => CommitMessage::licence_changed(
                &self.licence_label(previous),
                &self.licence_label(licence),
            ),
            None => String::new(),
        };

        let commit = self.build_upload_commit(request, stored, licence, modified, Some(parent), message)?;
        record.commit_list.insert(commit.clone());
        record
            .branch_heads
            .advance(&branch, &commit, &record.commit_list)?;
        persist_graph(tx, &record)?;

        Ok(UploadOutcome {
            commit,
            branch,
            size: stored.size,
            created_database: false,
        })
    }

    fn upload_new(
        &self,
        tx: &mut dyn StoreTx,
        request: &UploadRequest,
        stored: StoredBlob,
        licence: Option<ContentHash>,
        modified: DateTime<Utc>,
    ) -> GraphResult<UploadOutcome> {
        if request.parent.is_some() {
            return Err(GraphError::Validation(format!(
                "database {} doesn't exist yet, it can't have a parent commit",
                request.db
            )));
        }
        let branch = request
            .branch
            .clone()
            .unwrap_or_else(|| self.config.default_branch.clone());
        let message = match &request.message {
            Some(message) => message.clone(),
            None => {
                let name = licence.map(|l| self.licence_label(Some(l)));
                CommitMessage::initial_upload(name.as_deref())
            }
        };

        let commit = self.build_upload_commit(request, stored, licence, modified, None, message)?;
        let mut new = NewDatabase::new(&request.db, branch.clone());
        new.public = request.public;
        new.one_line_description = request.one_line_description.clone();
        new.source_url = request.source_url.clone();
        new.commit_list.insert(commit.clone());
        new.branch_heads.advance(&branch, &commit, &new.commit_list)?;

        let id = tx.insert_database(&new)?;
        tracing::debug!(database = %request.db, id = %id, "database created");

        Ok(UploadOutcome {
            commit,
            branch,
            size: stored.size,
            created_database: true,
        })
    }

    fn build_upload_commit(
        &self,
        request: &UploadRequest,
        stored: StoredBlob,
        licence: Option<ContentHash>,
        modified: DateTime<Utc>,
        parent: Option<CommitId>,
        message: String,
    ) -> GraphResult<Commit> {
        let entry = TreeEntry::data_file(request.db.name.as_str(), stored.hash, stored.size, modified)
            .with_licence(licence);
        let mut builder = CommitBuilder::new(vec![entry])
            .parent(parent)
            .author(request.author.clone())
            .message(message);
        if let Some(committer) = &request.committer {
            builder = builder.committer(committer.clone());
        }
        builder.build()
    }

    fn licence_label(&self, licence: Option<ContentHash>) -> String {
        match licence {
            Some(hash) => self
                .config
                .licence_name(&hash)
                .map(str::to_string)
                .unwrap_or_else(|| hash.short()),
            None => "Not specified".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::blob::MemoryBlobStore;
    use crate::hub::HubConfig;
    use crate::store::MemoryStore;

    fn cc0() -> ContentHash {
        ContentHash::digest(b"CC0 1.0 Universal")
    }

    fn odbl() -> ContentHash {
        ContentHash::digest(b"Open Database License")
    }

    fn hub() -> Hub<MemoryStore, MemoryBlobStore> {
        let config = HubConfig::default()
            .licence("CC0", cc0())
            .licence("ODbL", odbl())
            .max_upload_bytes(64);
        Hub::new(MemoryStore::new(), MemoryBlobStore::new(), config)
    }

    fn request() -> UploadRequest {
        UploadRequest::new(
            DatabaseRef::parse("alice", "stats.sqlite").unwrap(),
            Signature::new("Alice", "alice@example.org"),
        )
    }

    #[test]
    fn test_first_upload_creates_database() {
        let hub = hub();
        let outcome = hub.upload(request().public(true), &mut &b"v1"[..]).unwrap();
        assert!(outcome.created_database);
        assert_eq!(outcome.branch.as_str(), "master");
        assert_eq!(outcome.size, 2);
        assert!(outcome.commit.is_root());
        assert_eq!(
            outcome.commit.message,
            "Initial database upload, licence not specified."
        );

        let record = hub.database(&request().db).unwrap();
        assert!(record.public);
        assert_eq!(record.commits, 1);
        assert_eq!(record.root_database, record.id);
        assert_eq!(hub.blobs().len(), 1);
    }

    #[test]
    fn test_initial_message_names_licence() {
        let hub = hub();
        let outcome = hub
            .upload(request().licence("CC0"), &mut &b"v1"[..])
            .unwrap();
        assert_eq!(
            outcome.commit.message,
            "Initial database upload, using licence CC0."
        );
        assert_eq!(outcome.commit.licence(), Some(cc0()));
    }

    #[test]
    fn test_next_upload_extends_default_branch_and_inherits_licence() {
        let hub = hub();
        let first = hub.upload(request().licence("CC0"), &mut &b"v1"[..]).unwrap();
        let second = hub
            .upload(request().message("more rows"), &mut &b"v2"[..])
            .unwrap();

        assert!(!second.created_database);
        assert_eq!(second.commit.parent, Some(first.commit.id));
        assert_eq!(second.commit.licence(), Some(cc0()));
        assert_eq!(
            hub.history(&request().db, &second.branch).unwrap(),
            vec![second.commit.id, first.commit.id]
        );
    }

    #[test]
    fn test_licence_change_message() {
        let hub = hub();
        hub.upload(request().licence("CC0"), &mut &b"v1"[..]).unwrap();
        let second = hub
            .upload(request().licence("ODbL"), &mut &b"v1"[..])
            .unwrap();
        assert_eq!(
            second.commit.message,
            "Database licence changed from 'CC0' to 'ODbL'."
        );
    }

    #[test]
    fn test_new_branch_needs_flag_and_parent() {
        let hub = hub();
        let first = hub.upload(request(), &mut &b"v1"[..]).unwrap();
        let dev = BranchName::new("dev").unwrap();

        let err = hub
            .upload(request().branch(dev.clone()), &mut &b"v2"[..])
            .unwrap_err();
        assert!(err.is_not_found());

        let err = hub
            .upload(request().branch(dev.clone()).create_branch(true), &mut &b"v2"[..])
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));

        let outcome = hub
            .upload(
                request()
                    .branch(dev.clone())
                    .create_branch(true)
                    .parent(first.commit.id),
                &mut &b"v2"[..],
            )
            .unwrap();
        assert_eq!(outcome.branch, dev);
        assert_eq!(hub.branches(&request().db).unwrap().get(&dev).unwrap().commit_count, 2);
    }

    #[test]
    fn test_rejected_payloads() {
        let hub = hub();
        let empty = hub.upload(request(), &mut &b""[..]).unwrap_err();
        assert!(matches!(empty, GraphError::Validation(_)));

        let big = vec![7u8; 1000];
        let too_big = hub.upload(request(), &mut &big[..]).unwrap_err();
        assert!(matches!(too_big, GraphError::Validation(_)));

        let unknown = hub
            .upload(request().licence("WTFPL"), &mut &b"v1"[..])
            .unwrap_err();
        assert!(matches!(unknown, GraphError::Validation(_)));

        assert!(hub.database(&request().db).unwrap_err().is_not_found());
        assert!(hub.blobs().is_empty());
    }

    #[test]
    fn test_upload_at_limit_is_stored_whole() {
        let hub = hub();
        let exact = vec![7u8; 64];
        let outcome = hub.upload(request(), &mut &exact[..]).unwrap();
        assert_eq!(outcome.size, 64);
        assert_eq!(hub.blobs().len(), 1);
        let (_, bytes) = hub.data_file(&request().db, None).unwrap();
        assert_eq!(bytes, exact);
    }

    #[test]
    fn test_unknown_parent() {
        let hub = hub();
        hub.upload(request(), &mut &b"v1"[..]).unwrap();
        let err = hub
            .upload(request().parent(CommitId::digest(b"elsewhere")), &mut &b"v2"[..])
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parent_on_new_database_rejected() {
        let hub = hub();
        let err = hub
            .upload(request().parent(CommitId::digest(b"x")), &mut &b"v1"[..])
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }
}
