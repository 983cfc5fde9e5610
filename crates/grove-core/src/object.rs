//! Content-addressable blob store.
//!
//! Every file body ever written is kept here, keyed by its SHA-256. Files
//! point at their current blob and commit changes record the blobs on
//! either side, so a commit's diff never depends on mutable file state.
//! Blobs live under a 2-character prefix directory (like git).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GroveError, GroveResult};
use crate::fsutil::atomic_write;
use crate::hash::{hash_bytes, is_full_hash};

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(objects_dir: &Path) -> Self {
        Self {
            root: objects_dir.to_path_buf(),
        }
    }

    /// Store a body and return its hash. Storing the same bytes twice is a no-op.
    pub fn put(&self, data: &[u8]) -> GroveResult<String> {
        let hash = hash_bytes(data);
        let path = self.blob_path(&hash);
        if !path.exists() {
            atomic_write(&path, data)?;
        }
        Ok(hash)
    }

    /// Read a blob back as text.
    pub fn get(&self, hash: &str) -> GroveResult<String> {
        if !is_full_hash(hash) {
            return Err(GroveError::InvalidInput(format!("bad blob hash: {hash}")));
        }
        let path = self.blob_path(hash);
        if !path.exists() {
            return Err(GroveError::not_found("blob", hash));
        }
        let bytes = fs::read(&path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn contains(&self, hash: &str) -> bool {
        is_full_hash(hash) && self.blob_path(hash).exists()
    }

    /// hash `abcdef...` -> `ab/cdef...`
    fn blob_path(&self, hash: &str) -> PathBuf {
        let (prefix, rest) = hash.split_at(2);
        self.root.join(prefix).join(rest)
    }
}
