//! Reassembly Engine
//!
//! Concatenates a session's chunks in index order into a staged file and
//! publishes it as one artifact. Chunks are purged only after the artifact
//! is in place; on a gap they are kept so the transfer can be resumed.

use crate::storage::{Artifact, ArtifactError, ArtifactStore};

use super::chunk_store::{ChunkStore, StoreError};
use super::types::UploadSession;

/// Reassembly errors
#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error("Chunk {index} of session {session_id} is missing")]
    MissingChunk { session_id: String, index: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Failed to write reassembled file: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds artifacts from stored chunks
#[derive(Clone)]
pub struct Reassembler {
    store: ChunkStore,
    artifacts: ArtifactStore,
}

impl Reassembler {
    pub fn new(store: ChunkStore, artifacts: ArtifactStore) -> Self {
        Self { store, artifacts }
    }

    /// Join chunks `0..total_chunks` into one artifact
    ///
    /// Fails fast on the first absent index, leaving no artifact behind.
    pub fn reassemble(&self, session: &UploadSession) -> Result<Artifact, ReassemblyError> {
        tracing::info!(
            session_id = %session.session_id,
            file_name = %session.filename,
            chunks = session.total_chunks,
            "Assembling file from chunks"
        );

        let mut staged = self.artifacts.stage()?;

        for index in 0..session.total_chunks {
            let chunk = self
                .store
                .get(&session.session_id, index)?
                .ok_or_else(|| ReassemblyError::MissingChunk {
                    session_id: session.session_id.clone(),
                    index,
                })?;
            staged.write_all(&chunk)?;
        }

        let artifact = self.artifacts.commit(staged, &session.filename)?;

        if let Err(e) = self.store.purge(&session.session_id) {
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "Failed to purge chunks after reassembly"
            );
        }

        tracing::info!(
            session_id = %session.session_id,
            artifact = %artifact.id,
            size = artifact.size,
            "File reassembled"
        );

        Ok(artifact)
    }
}
