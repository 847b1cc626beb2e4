//! The content-addressed commit graph.
//!
//! Every version of a hosted data file is a `Commit` pointing at a `Tree`
//! and at its parent. Commits of all branches of a database live together
//! in one append-only `CommitList`; the `BranchLedger` maps branch names to
//! head commits.
//!
//! ```text
//!            branch_heads                      commit_list
//!   ┌─────────────────────────┐      ┌───────────────────────────────┐
//!   │ master  -> C3 (count 3) │─────▶│ C3 ─▶ C2 ─▶ C1                │
//!   │ feature -> C4 (count 3) │─────▶│ C4 ─▶ C2                      │
//!   └─────────────────────────┘      └───────────────────────────────┘
//! ```

pub mod blob;
pub mod commit;
pub mod error;
pub mod history;
pub mod refs;
pub mod tree;
pub mod types;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore, StoredBlob};
pub use commit::{Commit, CommitBuilder, CommitList, CommitMessage};
pub use error::{BlobError, GraphError, GraphResult};
pub use history::HistoryWalker;
pub use refs::{BranchEntry, BranchLedger, RollbackPlan};
pub use tree::{EntryType, Tree, TreeEntry};
pub use types::{
    BranchName, CommitId, ContentHash, DatabaseId, DatabaseName, DatabaseRef, InvalidNameError,
    OwnerName, Signature, TreeId,
};
