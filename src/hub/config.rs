//! Hub configuration.
//!
//! Loaded from a TOML file, every key optional:
//!
//! ```toml
//! database_path = "hub.sqlite"
//! blob_dir = "blobs"
//! default_branch = "master"
//! blob_folder_chars = 6
//! retry_on_conflict = true
//! max_upload_bytes = 536870912
//! log_filter = "info"
//! log_json = false
//!
//! [licences]
//! "CC0" = "<sha256 of the licence text>"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::graph::types::{BranchName, ContentHash};

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Hub configuration options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Path to the SQLite file holding database rows.
    pub database_path: PathBuf,
    /// Root directory of the filesystem blob store.
    pub blob_dir: PathBuf,
    /// Branch a new database starts on.
    pub default_branch: BranchName,
    /// Leading hash characters used as the blob folder name.
    pub blob_folder_chars: usize,
    /// Retry a mutation once when the store reports a serialization conflict.
    pub retry_on_conflict: bool,
    /// Largest accepted upload.
    pub max_upload_bytes: u64,
    /// Known licences, name to content hash of the licence text.
    pub licences: BTreeMap<String, ContentHash>,
    /// Default tracing filter when `RUST_LOG` isn't set.
    pub log_filter: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("hub.sqlite"),
            blob_dir: PathBuf::from("blobs"),
            default_branch: BranchName::default_branch(),
            blob_folder_chars: 6,
            retry_on_conflict: true,
            max_upload_bytes: 512 * 1024 * 1024,
            licences: BTreeMap::new(),
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

impl HubConfig {
    /// Create a configuration with the given storage locations.
    pub fn new(database_path: impl Into<PathBuf>, blob_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            blob_dir: blob_dir.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=63).contains(&self.blob_folder_chars) {
            return Err(ConfigError::Invalid(format!(
                "blob_folder_chars must be between 1 and 63, got {}",
                self.blob_folder_chars
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Set the default branch for new databases.
    pub fn default_branch(mut self, branch: BranchName) -> Self {
        self.default_branch = branch;
        self
    }

    /// Set retry_on_conflict flag.
    pub fn retry_on_conflict(mut self, value: bool) -> Self {
        self.retry_on_conflict = value;
        self
    }

    /// Set the upload size limit.
    pub fn max_upload_bytes(mut self, value: u64) -> Self {
        self.max_upload_bytes = value;
        self
    }

    /// Register a licence by name.
    pub fn licence(mut self, name: impl Into<String>, hash: ContentHash) -> Self {
        self.licences.insert(name.into(), hash);
        self
    }

    /// Content hash of a licence by name.
    pub fn licence_hash(&self, name: &str) -> Option<ContentHash> {
        self.licences.get(name).copied()
    }

    /// Name of a licence by content hash.
    pub fn licence_name(&self, hash: &ContentHash) -> Option<&str> {
        self.licences
            .iter()
            .find(|(_, h)| *h == hash)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.default_branch.as_str(), "master");
        assert_eq!(config.blob_folder_chars, 6);
        assert!(config.retry_on_conflict);
        assert_eq!(config.max_upload_bytes, 536_870_912);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let cc0 = ContentHash::digest(b"CC0 text");
        let text = format!(
            "database_path = \"/srv/hub.sqlite\"\n\
             default_branch = \"main\"\n\
             log_json = true\n\
             [licences]\n\
             CC0 = \"{}\"\n",
            cc0
        );
        let config = HubConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/srv/hub.sqlite"));
        assert_eq!(config.default_branch.as_str(), "main");
        assert!(config.log_json);
        assert_eq!(config.blob_dir, PathBuf::from("blobs"));
        assert_eq!(config.licence_hash("CC0"), Some(cc0));
        assert_eq!(config.licence_name(&cc0), Some("CC0"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(HubConfig::from_toml_str("blob_folder_chars = 0").is_err());
        assert!(HubConfig::from_toml_str("default_branch = \"a b\"").is_err());
        assert!(HubConfig::from_toml_str("unknown_key = 1").is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hub.toml");
        std::fs::write(&path, "retry_on_conflict = false\n").unwrap();
        let config = HubConfig::load(&path).unwrap();
        assert!(!config.retry_on_conflict);

        let missing = HubConfig::load(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
