//! Ingest service
//!
//! The entry points the HTTP layer calls. All operations are blocking and
//! safe to run concurrently from a worker pool; async callers should go
//! through `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use crate::archive;
use crate::crypto::{self, DecryptError, SecretProvider};
use crate::storage::{sanitize_filename, Artifact, ArtifactStore};

use super::chunk_store::ChunkStore;
use super::reassembly::{Reassembler, ReassemblyError};
use super::session::SessionManager;
use super::types::{
    ChunkOutcome, DecryptMode, DecryptOutcome, SessionState, UploadError, UploadSession,
};

/// File ingest over the session tracker, chunk store and artifact store
#[derive(Clone)]
pub struct IngestService {
    sessions: SessionManager,
    chunks: ChunkStore,
    artifacts: ArtifactStore,
    reassembler: Reassembler,
    secrets: Arc<dyn SecretProvider>,
}

impl IngestService {
    pub fn new(
        chunks: ChunkStore,
        artifacts: ArtifactStore,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        Self {
            sessions: SessionManager::new(),
            reassembler: Reassembler::new(chunks.clone(), artifacts.clone()),
            chunks,
            artifacts,
            secrets,
        }
    }

    /// Cap the number of chunks a single session may declare
    pub fn with_max_chunks(self, max_chunks: usize) -> Self {
        Self {
            sessions: SessionManager::with_max_chunks(max_chunks),
            ..self
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    // ========================================================================
    // Single-payload upload
    // ========================================================================

    /// Store an already-decoded payload as one artifact
    pub fn store_encoded(&self, filename: &str, data: &[u8]) -> Result<Artifact, UploadError> {
        let artifact = self.artifacts.store_bytes(filename, data)?;

        tracing::info!(
            file_name = %filename,
            artifact = %artifact.id,
            size = artifact.size,
            "Saved file"
        );

        Ok(artifact)
    }

    // ========================================================================
    // Chunked upload
    // ========================================================================

    /// Accept one chunk, reassembling when it is the last one missing
    ///
    /// Exactly one request per session observes the final chunk and runs the
    /// reassembly; its outcome carries the artifact.
    pub fn begin_or_record_chunk(
        &self,
        session_id: &str,
        filename: &str,
        chunk_index: usize,
        total_chunks: usize,
        data: &[u8],
    ) -> Result<ChunkOutcome, UploadError> {
        let filename = sanitize_filename(filename)?;

        if chunk_index >= total_chunks && total_chunks > 0 {
            return Err(UploadError::ChunkIndexOutOfBounds {
                index: chunk_index,
                total: total_chunks,
            });
        }

        // A retry of a finished transfer reports the finished transfer
        if let Some(session) =
            self.sessions
                .completed_delivery(session_id, &filename, total_chunks, chunk_index)
        {
            tracing::debug!(session_id, chunk_index, "Chunk for completed session ignored");
            return Ok(ChunkOutcome {
                artifact: session.artifact.clone(),
                session,
                newly_recorded: false,
            });
        }

        let restarting = matches!(
            self.sessions.status(session_id),
            Ok(previous) if previous.state == SessionState::Failed
                && previous.filename == filename
                && previous.total_chunks == total_chunks
        );
        if restarting {
            let stored = self.chunks.list_indices(session_id)?;
            self.sessions
                .begin_or_resume(session_id, &filename, total_chunks, Some(&stored))?;
        } else {
            self.sessions.begin_or_get(session_id, &filename, total_chunks)?;
        }

        // Stored before it is counted, so a counted index is always readable
        self.chunks.put(session_id, chunk_index, data)?;
        let record = self.sessions.record_chunk_received(session_id, chunk_index)?;

        tracing::debug!(
            session_id,
            chunk_index,
            size = data.len(),
            received = record.session.received_chunks,
            total = total_chunks,
            "Chunk received"
        );

        if !record.ready_for_reassembly {
            return Ok(ChunkOutcome {
                session: record.session,
                newly_recorded: record.newly_recorded,
                artifact: None,
            });
        }

        match self.reassembler.reassemble(&record.session) {
            Ok(artifact) => {
                let session = match self.sessions.mark_complete(session_id, &artifact) {
                    Ok(session) => session,
                    Err(e) => {
                        // Aborted mid-assembly; the artifact is already published
                        tracing::warn!(session_id, error = %e, "Session vanished during reassembly");
                        let mut session = record.session;
                        session.state = SessionState::Complete;
                        session.artifact = Some(artifact.clone());
                        session
                    }
                };

                Ok(ChunkOutcome {
                    session,
                    newly_recorded: record.newly_recorded,
                    artifact: Some(artifact),
                })
            }
            Err(e) => {
                let missing = match &e {
                    ReassemblyError::MissingChunk { index, .. } => Some(*index),
                    _ => None,
                };
                if let Err(mark_err) = self.sessions.mark_failed(session_id, &e.to_string(), missing) {
                    tracing::warn!(session_id, error = %mark_err, "Could not mark session failed");
                }
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Encrypted upload
    // ========================================================================

    /// Decrypt a payload and store it raw or extract it as a zip
    pub fn decrypt_and_maybe_extract(
        &self,
        payload: &[u8],
        filename: &str,
        mode: DecryptMode,
    ) -> Result<DecryptOutcome, UploadError> {
        let filename = sanitize_filename(filename)?;
        let key = self.secrets.current_key().map_err(DecryptError::from)?;
        let decrypted = crypto::decrypt(payload, &key)?;

        tracing::info!(
            file_name = %filename,
            size = decrypted.plaintext.len(),
            mode = ?mode,
            "Processing encrypted file"
        );

        match mode {
            DecryptMode::RawDecrypt => {
                let artifact = self.artifacts.store_bytes(&filename, &decrypted.plaintext)?;
                Ok(DecryptOutcome::Stored {
                    artifact,
                    original_len: decrypted.original_len,
                })
            }
            DecryptMode::DecryptThenUnzip => {
                // Dropping the staging dir on error discards partial output
                let staged = self.artifacts.stage_dir()?;
                let entries = archive::extract(&decrypted.plaintext, staged.path())?;
                let directory = self.artifacts.commit_dir(staged, &filename)?;
                Ok(DecryptOutcome::Extracted { directory, entries })
            }
        }
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    pub fn session_status(&self, session_id: &str) -> Result<UploadSession, UploadError> {
        self.sessions.status(session_id)
    }

    /// Forget a session and delete its stored chunks
    pub fn abort_session(&self, session_id: &str) -> Result<UploadSession, UploadError> {
        let session = self.sessions.abort(session_id)?;
        self.chunks.purge(session_id)?;
        Ok(session)
    }

    /// Drop idle sessions and their chunks, returning how many were removed
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let swept = self.sessions.sweep_idle(max_idle);
        for session in &swept {
            if let Err(e) = self.chunks.purge(&session.session_id) {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Failed to purge chunks of idle session"
                );
            }
        }
        swept.len()
    }
}
