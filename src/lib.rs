//! HubGraph - commit, branch and fork graph for hosted data files
//!
//! Every upload of a database file becomes a content-addressed commit on a
//! branch. Databases can be forked between owners, and the fork lineage of a
//! database can be rendered as a tree.
//!
//! # Example
//!
//! ```no_run
//! use hubgraph::graph::{DatabaseRef, FsBlobStore, OwnerName, Signature};
//! use hubgraph::hub::{Hub, HubConfig, UploadRequest};
//! use hubgraph::store::SqliteStore;
//!
//! let config = HubConfig::new("hub.sqlite", "blobs");
//! let store = SqliteStore::open(&config.database_path).unwrap();
//! let blobs = FsBlobStore::open(&config.blob_dir, config.blob_folder_chars).unwrap();
//! let hub = Hub::new(store, blobs, config);
//!
//! let db: DatabaseRef = "alice/stats.sqlite".parse().unwrap();
//! let file = std::fs::File::open("stats.sqlite").unwrap();
//! let request = UploadRequest::new(db.clone(), Signature::new("Alice", "alice@example.org"));
//! hub.upload(request, &mut &file).unwrap();
//! hub.fork(&db, &OwnerName::new("bob").unwrap()).unwrap();
//! ```

pub mod fork;
pub mod graph;
pub mod hub;
pub mod store;
