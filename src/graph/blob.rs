//! content-addressed blob storage for raw file bytes.
//!
//! blobs are immutable once written and addressed by the SHA-256 of their
//! bytes. uploads are streamed through the hasher while they are written, so
//! the hash is known by the time the graph transaction opens.
//!
//! `FsBlobStore` lays files out as `<root>/<first N hash chars>/<rest>`:
//!
//! ```text
//! 34f4255a737156147fbd0a44323a895d18ade79d4db521564d1b0dbb8764cbbc
//!   -> 34f425/5a737156147fbd0a44323a895d18ade79d4db521564d1b0dbb8764cbbc
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::graph::error::BlobError;
use crate::graph::types::ContentHash;

/// address and size of a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredBlob {
    pub hash: ContentHash,
    pub size: u64,
}

/// the blob store collaborator
pub trait BlobStore: Send + Sync {
    /// store everything `reader` yields and return its address
    fn put(&self, reader: &mut dyn Read) -> Result<StoredBlob, BlobError>;

    /// stream the bytes stored under `hash`
    fn get(&self, hash: &ContentHash) -> Result<Box<dyn Read + Send>, BlobError>;

    fn exists(&self, hash: &ContentHash) -> Result<bool, BlobError>;

    /// store an in-memory buffer
    fn put_bytes(&self, bytes: &[u8]) -> Result<StoredBlob, BlobError> {
        self.put(&mut Cursor::new(bytes))
    }

    /// read a blob fully and check it still hashes to its address
    fn read_verified(&self, hash: &ContentHash) -> Result<Vec<u8>, BlobError> {
        let mut bytes = Vec::new();
        self.get(hash)?.read_to_end(&mut bytes)?;
        let actual = ContentHash::digest(&bytes);
        if actual != *hash {
            return Err(BlobError::Corrupt {
                expected: *hash,
                actual,
            });
        }
        Ok(bytes)
    }
}

/// writer adapter that hashes and counts everything passing through it
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> (W, StoredBlob) {
        let hash = ContentHash::from_bytes(self.hasher.finalize().into());
        (
            self.inner,
            StoredBlob {
                hash,
                size: self.written,
            },
        )
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// blob store kept in memory, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ContentHash, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, reader: &mut dyn Read) -> Result<StoredBlob, BlobError> {
        let mut writer = HashingWriter::new(Vec::new());
        io::copy(reader, &mut writer)?;
        let (bytes, stored) = writer.finish();
        self.blobs.write().entry(stored.hash).or_insert(bytes);
        Ok(stored)
    }

    fn get(&self, hash: &ContentHash) -> Result<Box<dyn Read + Send>, BlobError> {
        let blobs = self.blobs.read();
        let bytes = blobs.get(hash).ok_or(BlobError::NotFound(*hash))?;
        Ok(Box::new(Cursor::new(bytes.clone())))
    }

    fn exists(&self, hash: &ContentHash) -> Result<bool, BlobError> {
        Ok(self.blobs.read().contains_key(hash))
    }
}

/// blob store on the local filesystem
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    folder_chars: usize,
}

impl FsBlobStore {
    /// open (and create if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>, folder_chars: usize) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            folder_chars: folder_chars.clamp(1, 63),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// where the blob for `hash` lives
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        let (folder, file) = hex.split_at(self.folder_chars);
        self.root.join(folder).join(file)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, reader: &mut dyn Read) -> Result<StoredBlob, BlobError> {
        let temp = tempfile::NamedTempFile::new_in(&self.root)?;
        let mut writer = HashingWriter::new(temp);
        io::copy(reader, &mut writer)?;
        writer.flush()?;
        let (temp, stored) = writer.finish();

        let path = self.blob_path(&stored.hash);
        if path.exists() {
            tracing::debug!(hash = %stored.hash, "blob already stored");
            return Ok(stored);
        }
        if let Some(folder) = path.parent() {
            fs::create_dir_all(folder)?;
        }
        temp.persist(&path).map_err(|e| BlobError::Io(e.error))?;
        tracing::debug!(hash = %stored.hash, size = stored.size, "blob stored");
        Ok(stored)
    }

    fn get(&self, hash: &ContentHash) -> Result<Box<dyn Read + Send>, BlobError> {
        match File::open(self.blob_path(hash)) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(*hash)),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    fn exists(&self, hash: &ContentHash) -> Result<bool, BlobError> {
        Ok(self.blob_path(hash).is_file())
    }
}
