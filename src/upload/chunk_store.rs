//! Chunk Store
//!
//! Scratch storage for the raw bytes of in-flight chunks, keyed by
//! `(session_id, index)`. Writes are durable before `put` returns and
//! re-writing an index replaces it, so client retries are safe.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

const CHUNK_SUFFIX: &str = ".chunk";

/// Chunk storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Chunk storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to persist chunk {index} of session {session_id}: {source}")]
    Persist {
        session_id: String,
        index: usize,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Chunk Storage Trait
// ============================================================================

/// Trait for chunk storage backends
///
/// Implementations must tolerate concurrent `put` calls for different
/// indices of the same session.
pub trait ChunkStorage: Send + Sync {
    /// Store a chunk, replacing any previous bytes at the same index
    fn put(&self, session_id: &str, index: usize, data: &[u8]) -> Result<(), StoreError>;

    /// Get a chunk, `None` when it was never stored or has been purged
    fn get(&self, session_id: &str, index: usize) -> Result<Option<Vec<u8>>, StoreError>;

    /// Indices currently stored for a session
    fn list_indices(&self, session_id: &str) -> Result<BTreeSet<usize>, StoreError>;

    /// Remove every chunk and any scratch state of a session
    fn purge(&self, session_id: &str) -> Result<usize, StoreError>;
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Chunk store with pluggable backends
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<dyn ChunkStorage>,
}

impl ChunkStore {
    /// Create with local filesystem storage
    pub fn with_local_storage(base_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(LocalChunkStorage::new(base_path)),
        }
    }

    pub fn put(&self, session_id: &str, index: usize, data: &[u8]) -> Result<(), StoreError> {
        self.inner.put(session_id, index, data)?;
        tracing::trace!(session_id, chunk_index = index, size = data.len(), "Chunk stored");
        Ok(())
    }

    pub fn get(&self, session_id: &str, index: usize) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(session_id, index)
    }

    pub fn list_indices(&self, session_id: &str) -> Result<BTreeSet<usize>, StoreError> {
        self.inner.list_indices(session_id)
    }

    pub fn purge(&self, session_id: &str) -> Result<usize, StoreError> {
        let removed = self.inner.purge(session_id)?;
        tracing::debug!(session_id, removed, "Purged session chunks");
        Ok(removed)
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage
///
/// Layout: `<base>/<sha256(session_id)>/<index:08>.chunk`. Session ids come
/// from clients, so they are hashed rather than used as path segments.
struct LocalChunkStorage {
    base_path: PathBuf,
}

impl LocalChunkStorage {
    fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        let digest = Sha256::digest(session_id.as_bytes());
        self.base_path.join(hex::encode(digest))
    }

    fn chunk_path(&self, session_id: &str, index: usize) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{:08}{}", index, CHUNK_SUFFIX))
    }
}

impl ChunkStorage for LocalChunkStorage {
    fn put(&self, session_id: &str, index: usize, data: &[u8]) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;

        // Write beside the target, fsync, then rename over it
        let mut staged = NamedTempFile::new_in(&dir)?;
        staged.write_all(data)?;
        staged.as_file().sync_all()?;
        staged
            .persist(self.chunk_path(session_id, index))
            .map_err(|e| StoreError::Persist {
                session_id: session_id.to_string(),
                index,
                source: e.error,
            })?;

        sync_dir(&dir)?;
        Ok(())
    }

    fn get(&self, session_id: &str, index: usize) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.chunk_path(session_id, index)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_indices(&self, session_id: &str) -> Result<BTreeSet<usize>, StoreError> {
        let entries = match fs::read_dir(self.session_dir(session_id)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = BTreeSet::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_suffix(CHUNK_SUFFIX))
                .and_then(|n| n.parse::<usize>().ok())
            {
                indices.insert(index);
            }
        }
        Ok(indices)
    }

    fn purge(&self, session_id: &str) -> Result<usize, StoreError> {
        let dir = self.session_dir(session_id);
        let count = self.list_indices(session_id)?.len();

        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
