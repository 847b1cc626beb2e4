//! tree construction for commit snapshots.
//!
//! a tree is the ordered list of content-addressed entries a commit points
//! at. in practice every commit carries exactly one data-file entry, with
//! the licence travelling alongside it as a hash on that entry.
//!
//! Canonical entry form, one line per entry:
//!
//! ```text
//! entry <type> \0 name <name> \0 sha256 <hash> \0 [licence <hash> \0] modified <rfc3339> \0 size <bytes> \n
//! ```
//!
//! The licence field is left out entirely when absent, so an entry with and
//! without a licence never hash the same.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::types::{ContentHash, TreeId};

/// the kind of object a tree entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    #[serde(rename = "tree")]
    Tree,
    #[serde(rename = "db")]
    DataFile,
    #[serde(rename = "licence")]
    Licence,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Tree => "tree",
            EntryType::DataFile => "db",
            EntryType::Licence => "licence",
        }
    }
}

/// one entry of a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub entry_type: EntryType,
    pub name: String,
    /// key into the blob store
    #[serde(rename = "sha256")]
    pub content_hash: ContentHash,
    #[serde(rename = "licence", default, skip_serializing_if = "Option::is_none")]
    pub licence_hash: Option<ContentHash>,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

impl TreeEntry {
    /// entry for an uploaded data file
    pub fn data_file(
        name: impl Into<String>,
        content_hash: ContentHash,
        size: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_type: EntryType::DataFile,
            name: name.into(),
            content_hash,
            licence_hash: None,
            last_modified: truncate_to_seconds(last_modified),
            size,
        }
    }

    /// attach a licence to the entry
    pub fn with_licence(mut self, licence: Option<ContentHash>) -> Self {
        self.licence_hash = licence;
        self
    }

    fn write_canonical(&self, buf: &mut Vec<u8>) {
        push_field(buf, "entry", self.entry_type.as_str());
        push_field(buf, "name", &self.name);
        push_field(buf, "sha256", &self.content_hash.to_hex());
        if let Some(licence) = &self.licence_hash {
            push_field(buf, "licence", &licence.to_hex());
        }
        push_field(buf, "modified", &format_timestamp(&self.last_modified));
        buf.extend_from_slice(format!("size {}\n", self.size).as_bytes());
    }
}

/// an ordered list of entries plus its derived ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub id: TreeId,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// build a tree, deriving its ID from the entries
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        let id = tree_id(&entries);
        Self { id, entries }
    }

    /// the data-file entry, if the tree has one
    pub fn data_file(&self) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.entry_type == EntryType::DataFile)
    }

    /// check that the stored ID still matches the entries
    pub fn is_consistent(&self) -> bool {
        tree_id(&self.entries) == self.id
    }
}

/// canonical byte form of a list of entries
pub fn canonical_tree_bytes(entries: &[TreeEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in entries {
        entry.write_canonical(&mut buf);
    }
    buf
}

/// derive the tree ID for a list of entries
pub fn tree_id(entries: &[TreeEntry]) -> TreeId {
    TreeId::digest(&canonical_tree_bytes(entries))
}

/// write `<key> <value>\0`
pub(crate) fn push_field(buf: &mut Vec<u8>, key: &str, value: &str) {
    buf.extend_from_slice(key.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
}

/// timestamps are hashed at whole-second precision
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}
