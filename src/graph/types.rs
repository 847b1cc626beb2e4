//! core type-safe wrappers for the commit graph.
//!
//! digests, names and references are all newtypes so a tree ID can't be
//! passed where a commit ID is expected, and a branch name can't reach the
//! ledger without being validated first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// defines a 32-byte SHA-256 digest newtype that serializes as lowercase hex
macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            /// digest of the given bytes
            pub fn digest(data: &[u8]) -> Self {
                Self(Sha256::digest(data).into())
            }

            /// wrap an already computed digest
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// parse from a 64 character hex string
            pub fn from_hex(hex_str: &str) -> Result<Self, InvalidNameError> {
                if hex_str.len() != 64 {
                    return Err(InvalidNameError::InvalidDigest(hex_str.to_string()));
                }
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(hex_str, &mut bytes)
                    .map_err(|_| InvalidNameError::InvalidDigest(hex_str.to_string()))?;
                Ok(Self(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// lowercase hex form
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// short form of the digest
            pub fn short(&self) -> String {
                self.to_hex()[..7].to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = InvalidNameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

digest_id!(
    /// content address of a commit
    CommitId
);

digest_id!(
    /// content address of a tree
    TreeId
);

digest_id!(
    /// SHA-256 of raw bytes held by the blob store (data files and licences)
    ContentHash
);

/// defines a validated string newtype
macro_rules! validated_name {
    ($(#[$meta:meta])* $name:ident, $validate:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
                let name = name.into();
                $validate(&name)?;
                Ok(Self(name))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = InvalidNameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }
    };
}

validated_name!(
    /// A validated owner (user) name.
    ///
    /// Valid names:
    /// - 1-63 characters
    /// - ASCII alphanumerics, underscores, hyphens and dots
    /// - must start with a letter or digit
    OwnerName,
    validate_owner
);

validated_name!(
    /// A validated database name.
    ///
    /// database names are usually file names ("stats.sqlite"), so anything
    /// that could act as a path separator is rejected.
    DatabaseName,
    validate_database
);

validated_name!(
    /// a branch name within one database
    BranchName,
    validate_branch
);

impl BranchName {
    /// branch used when a new database doesn't ask for one
    pub const DEFAULT: &'static str = "master";

    pub fn default_branch() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

fn validate_owner(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name.len() > 63 {
        return Err(InvalidNameError::TooLong(name.len()));
    }

    let first_char = name.chars().next().ok_or(InvalidNameError::Empty)?;
    if !first_char.is_ascii_alphanumeric() {
        return Err(InvalidNameError::InvalidStart(first_char));
    }

    for (i, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '.' {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    Ok(())
}

fn validate_database(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name.len() > 256 {
        return Err(InvalidNameError::TooLong(name.len()));
    }
    if name == "." || name == ".." {
        return Err(InvalidNameError::InvalidPath(name.to_string()));
    }
    for (i, c) in name.chars().enumerate() {
        if c == '/' || c == '\\' || c.is_control() {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    Ok(())
}

fn validate_branch(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name.len() > 256 {
        return Err(InvalidNameError::TooLong(name.len()));
    }
    if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
        return Err(InvalidNameError::InvalidPath(name.to_string()));
    }
    for (i, c) in name.chars().enumerate() {
        if c.is_whitespace() || c.is_control() {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    Ok(())
}

/// row identifier of a database record in the relational store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseId(pub(crate) i64);

impl DatabaseId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a hosted database: `{owner}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseRef {
    pub owner: OwnerName,
    pub name: DatabaseName,
}

impl DatabaseRef {
    pub fn new(owner: OwnerName, name: DatabaseName) -> Self {
        Self { owner, name }
    }

    /// validate and build a reference from raw strings
    pub fn parse(owner: &str, name: &str) -> Result<Self, InvalidNameError> {
        Ok(Self {
            owner: OwnerName::new(owner)?,
            name: DatabaseName::new(name)?,
        })
    }
}

impl fmt::Display for DatabaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for DatabaseRef {
    type Err = InvalidNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, name) = s
            .split_once('/')
            .ok_or_else(|| InvalidNameError::InvalidPath(s.to_string()))?;
        Self::parse(owner, name)
    }
}

/// author or committer identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// error type for invalid names and identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidStart(char),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
    InvalidDigest(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidStart(c) => write!(f, "name cannot start with '{}'", c),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char.escape_debug(), position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
            Self::InvalidDigest(s) => write!(f, "not a sha256 hex digest: '{}'", s),
        }
    }
}

impl std::error::Error for InvalidNameError {}
