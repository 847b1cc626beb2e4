//! commit creation and the commit list.
//!
//! commits are immutable, content-addressed snapshots. the ID is the SHA-256
//! of a canonical serialization of the tree ID, parent, author, committer,
//! timestamp and message, so any change to those produces a different ID.
//!
//! Canonical form:
//!
//! ```text
//! tree <tree id> \0
//! parent <commit id> \0                      (left out for a root commit)
//! author <name> <<email>> <rfc3339> \0
//! committer <name> <<email>> <rfc3339> \0    (left out when no committer)
//! message <message> \0
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::error::{GraphError, GraphResult};
use crate::graph::tree::{format_timestamp, push_field, truncate_to_seconds, Tree, TreeEntry};
use crate::graph::types::{CommitId, ContentHash, Signature, TreeId};

/// an immutable commit record, as stored in a database's commit list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CommitId>,
    /// reserved for merge commits, never populated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_parents: Vec<CommitId>,
    pub author: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer: Option<Signature>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub tree: Tree,
}

impl Commit {
    /// check if this is the first commit of a history
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// first line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }

    /// licence of the data file in this commit
    pub fn licence(&self) -> Option<ContentHash> {
        self.tree.data_file().and_then(|e| e.licence_hash)
    }

    /// re-derive the tree and commit IDs and compare them with the stored ones
    pub fn verify(&self) -> GraphResult<()> {
        check_separators(&self.tree.entries, &self.author, self.committer.as_ref(), &self.message)?;
        if !self.tree.is_consistent() {
            return Err(GraphError::Validation(format!(
                "tree {} of commit {} does not match its entries",
                self.tree.id, self.id
            )));
        }
        let derived = commit_id(
            self.tree.id,
            self.parent.as_ref(),
            &self.author,
            self.committer.as_ref(),
            &self.timestamp,
            &self.message,
        );
        if derived != self.id {
            return Err(GraphError::Validation(format!(
                "commit {} does not match its contents (derives to {})",
                self.id, derived
            )));
        }
        Ok(())
    }
}

/// canonical byte form of a commit
pub fn canonical_commit_bytes(
    tree: TreeId,
    parent: Option<&CommitId>,
    author: &Signature,
    committer: Option<&Signature>,
    timestamp: &DateTime<Utc>,
    message: &str,
) -> Vec<u8> {
    let ts = format_timestamp(timestamp);
    let mut buf = Vec::new();
    push_field(&mut buf, "tree", &tree.to_hex());
    if let Some(parent) = parent {
        push_field(&mut buf, "parent", &parent.to_hex());
    }
    push_field(&mut buf, "author", &format!("{} <{}> {}", author.name, author.email, ts));
    if let Some(committer) = committer {
        push_field(
            &mut buf,
            "committer",
            &format!("{} <{}> {}", committer.name, committer.email, ts),
        );
    }
    push_field(&mut buf, "message", message);
    buf
}

/// reject NUL in any free-text field, it would let one field end early in
/// the canonical form
fn check_separators(
    entries: &[TreeEntry],
    author: &Signature,
    committer: Option<&Signature>,
    message: &str,
) -> GraphResult<()> {
    let mut fields = vec![
        ("author name", author.name.as_str()),
        ("author email", author.email.as_str()),
        ("message", message),
    ];
    if let Some(committer) = committer {
        fields.push(("committer name", committer.name.as_str()));
        fields.push(("committer email", committer.email.as_str()));
    }
    fields.extend(entries.iter().map(|e| ("tree entry name", e.name.as_str())));

    match fields.iter().find(|(_, value)| value.contains('\0')) {
        Some((field, _)) => Err(GraphError::Validation(format!(
            "{} must not contain a NUL byte",
            field
        ))),
        None => Ok(()),
    }
}

/// derive a commit ID
pub fn commit_id(
    tree: TreeId,
    parent: Option<&CommitId>,
    author: &Signature,
    committer: Option<&Signature>,
    timestamp: &DateTime<Utc>,
    message: &str,
) -> CommitId {
    CommitId::digest(&canonical_commit_bytes(
        tree, parent, author, committer, timestamp, message,
    ))
}

/// builder for creating commits with a fluent interface
#[derive(Debug, Clone)]
pub struct CommitBuilder {
    entries: Vec<TreeEntry>,
    parent: Option<CommitId>,
    author: Option<Signature>,
    committer: Option<Signature>,
    message: String,
    timestamp: Option<DateTime<Utc>>,
}

impl CommitBuilder {
    /// start a commit over the given tree entries
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        Self {
            entries,
            parent: None,
            author: None,
            committer: None,
            message: String::new(),
            timestamp: None,
        }
    }

    /// set the parent commit (`None` starts a new history)
    pub fn parent(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    pub fn author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// fix the timestamp instead of using the current time
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// derive the tree and commit IDs and return the commit
    pub fn build(self) -> GraphResult<Commit> {
        if self.entries.is_empty() {
            return Err(GraphError::Validation("a commit needs at least one tree entry".into()));
        }
        let author = self
            .author
            .ok_or_else(|| GraphError::Validation("a commit needs an author".into()))?;
        if author.name.trim().is_empty() || author.email.trim().is_empty() {
            return Err(GraphError::Validation(
                "author name and email address must both be set".into(),
            ));
        }
        let committer = self.committer.filter(|c| !c.email.is_empty());
        check_separators(&self.entries, &author, committer.as_ref(), &self.message)?;

        let timestamp = truncate_to_seconds(self.timestamp.unwrap_or_else(Utc::now));
        let tree = Tree::new(self.entries);
        let id = commit_id(
            tree.id,
            self.parent.as_ref(),
            &author,
            committer.as_ref(),
            &timestamp,
            &self.message,
        );

        Ok(Commit {
            id,
            parent: self.parent,
            other_parents: Vec::new(),
            author,
            committer,
            message: self.message,
            timestamp,
            tree,
        })
    }
}

/// the append-only union of every commit across all branches of a database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitList(BTreeMap<CommitId, Commit>);

impl CommitList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &CommitId) -> Option<&Commit> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.0.contains_key(id)
    }

    /// add a commit; re-adding an existing ID is a no-op
    pub fn insert(&mut self, commit: Commit) {
        self.0.entry(commit.id).or_insert(commit);
    }

    pub fn remove(&mut self, id: &CommitId) -> Option<Commit> {
        self.0.remove(id)
    }

    /// number of distinct commits
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &CommitId> {
        self.0.keys()
    }
}

impl FromIterator<Commit> for CommitList {
    fn from_iter<I: IntoIterator<Item = Commit>>(iter: I) -> Self {
        let mut list = CommitList::new();
        for commit in iter {
            list.insert(commit);
        }
        list
    }
}

/// default commit messages for uploads
pub struct CommitMessage;

impl CommitMessage {
    /// message for the first upload of a database
    pub fn initial_upload(licence_name: Option<&str>) -> String {
        match licence_name {
            Some(name) => format!("Initial database upload, using licence {}.", name),
            None => "Initial database upload, licence not specified.".to_string(),
        }
    }

    /// message for an upload that only changes the licence
    pub fn licence_changed(old: &str, new: &str) -> String {
        format!("Database licence changed from '{}' to '{}'.", old, new)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_500_000_000 + secs, 0).unwrap()
    }

    pub(crate) fn entry(content: &[u8]) -> TreeEntry {
        TreeEntry::data_file("stats.sqlite", ContentHash::digest(content), content.len() as u64, ts(0))
    }

    /// build a commit with a fixed timestamp
    pub(crate) fn make_commit(parent: Option<CommitId>, message: &str) -> Commit {
        CommitBuilder::new(vec![entry(message.as_bytes())])
            .parent(parent)
            .author(Signature::new("Alice", "alice@example.org"))
            .message(message)
            .timestamp(ts(1))
            .build()
            .unwrap()
    }

    fn builder() -> CommitBuilder {
        CommitBuilder::new(vec![entry(b"v1")])
            .author(Signature::new("Alice", "alice@example.org"))
            .message("first upload")
            .timestamp(ts(10))
    }

    #[test]
    fn test_identical_inputs_same_id() {
        let a = builder().build().unwrap();
        let b = builder().build().unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.is_root());
    }

    #[test]
    fn test_any_field_change_changes_id() {
        let base = builder().build().unwrap().id;

        let message = builder().message("second upload").build().unwrap().id;
        let parent = builder().parent(Some(base)).build().unwrap().id;
        let email = builder()
            .author(Signature::new("Alice", "alice@example.com"))
            .build()
            .unwrap()
            .id;
        let time = builder().timestamp(ts(11)).build().unwrap().id;
        let tree = CommitBuilder::new(vec![entry(b"v2")])
            .author(Signature::new("Alice", "alice@example.org"))
            .message("first upload")
            .timestamp(ts(10))
            .build()
            .unwrap()
            .id;

        for other in [message, parent, email, time, tree] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn test_committer_presence_changes_id() {
        let without = builder().build().unwrap();
        let with = builder()
            .committer(Signature::new("Bob", "bob@example.org"))
            .build()
            .unwrap();
        assert_ne!(without.id, with.id);

        // an empty committer email counts as no committer
        let empty = builder().committer(Signature::new("", "")).build().unwrap();
        assert_eq!(without.id, empty.id);
    }

    #[test]
    fn test_nul_in_fields_rejected() {
        let with_committer = builder()
            .committer(Signature::new("B", "f"))
            .build()
            .unwrap();
        let forged_name = format!(
            "Alice <alice@example.org> {}\0committer B",
            format_timestamp(&with_committer.timestamp)
        );
        let err = builder()
            .author(Signature::new(forged_name, "f"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));

        let err = builder().message("a\0b").build().unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));

        let err = builder()
            .committer(Signature::new("Bob", "bob\0@example.org"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));

        // a stored commit edited to carry a NUL fails verification too
        let mut tampered = with_committer;
        tampered.message.push('\0');
        assert!(matches!(tampered.verify(), Err(GraphError::Validation(_))));
    }

    #[test]
    fn test_subsecond_timestamps_truncated() {
        let precise = ts(10) + chrono::Duration::milliseconds(250);
        let a = builder().timestamp(precise).build().unwrap();
        let b = builder().build().unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.timestamp, ts(10));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let no_entries = CommitBuilder::new(vec![])
            .author(Signature::new("Alice", "alice@example.org"))
            .build();
        assert!(matches!(no_entries, Err(GraphError::Validation(_))));

        let no_author = CommitBuilder::new(vec![entry(b"x")]).build();
        assert!(matches!(no_author, Err(GraphError::Validation(_))));

        let blank_email = CommitBuilder::new(vec![entry(b"x")])
            .author(Signature::new("Alice", " "))
            .build();
        assert!(matches!(blank_email, Err(GraphError::Validation(_))));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let commit = builder().build().unwrap();
        assert!(commit.verify().is_ok());

        let mut edited = commit.clone();
        edited.message = "rewritten".to_string();
        assert!(matches!(edited.verify(), Err(GraphError::Validation(_))));

        let mut resized = commit;
        resized.tree.entries[0].size = 999;
        assert!(resized.verify().is_err());
    }

    #[test]
    fn test_commit_survives_json_roundtrip() {
        let commit = make_commit(None, "hello\nbody text");
        let json = serde_json::to_string(&commit).unwrap();
        let back: Commit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, commit);
        assert!(back.verify().is_ok());
        assert_eq!(back.summary(), "hello");
    }

    #[test]
    fn test_canonical_form_omits_absent_fields() {
        let author = Signature::new("Alice", "alice@example.org");
        let tree = Tree::new(vec![entry(b"v1")]);
        let root = canonical_commit_bytes(tree.id, None, &author, None, &ts(0), "msg");
        let text = String::from_utf8(root).unwrap();
        assert!(text.starts_with("tree "));
        assert!(!text.contains("parent "));
        assert!(!text.contains("committer "));
        assert!(text.ends_with("message msg\0"));
    }

    #[test]
    fn test_commit_list_insert_is_idempotent() {
        let c1 = make_commit(None, "one");
        let mut list = CommitList::new();
        list.insert(c1.clone());
        list.insert(c1.clone());
        assert_eq!(list.len(), 1);
        assert!(list.contains(&c1.id));
        assert_eq!(list.remove(&c1.id), Some(c1));
        assert!(list.is_empty());
    }

    #[test]
    fn test_default_messages() {
        assert_eq!(
            CommitMessage::initial_upload(None),
            "Initial database upload, licence not specified."
        );
        assert_eq!(
            CommitMessage::initial_upload(Some("CC0")),
            "Initial database upload, using licence CC0."
        );
        assert_eq!(
            CommitMessage::licence_changed("CC0", "ODbL"),
            "Database licence changed from 'CC0' to 'ODbL'."
        );
    }
}
