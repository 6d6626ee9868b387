//! Upload types for chunked, encoded and encrypted transfers

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::{ExtractError, ExtractedEntry};
use crate::crypto::DecryptError;
use crate::storage::{Artifact, ArtifactError};

use super::chunk_store::StoreError;
use super::reassembly::ReassemblyError;

// ============================================================================
// Session Types
// ============================================================================

/// Lifecycle of a chunked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Accepting chunks
    Receiving,
    /// Reassembled into an artifact
    Complete,
    /// Reassembly found a gap
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Receiving)
    }
}

/// Server-side record of one multi-chunk transfer
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Caller-supplied id, or the filename when none was sent
    pub session_id: String,

    /// Logical target name (not yet unique-ified)
    pub filename: String,

    /// Fixed by the first chunk of the session
    pub total_chunks: usize,

    /// Distinct indices accepted so far
    pub received_chunks: usize,

    pub started_at: DateTime<Utc>,

    pub last_chunk_at: Option<DateTime<Utc>>,

    pub state: SessionState,

    /// Reason recorded on the transition to `Failed`
    pub failure: Option<String>,

    /// Artifact published on the transition to `Complete`
    pub artifact: Option<Artifact>,

    pub(crate) received: BTreeSet<usize>,

    /// One-shot latch: set by the request that observes the final chunk
    pub(crate) assembly_claimed: bool,

    /// Index reported absent when reassembly failed
    pub(crate) missing_index: Option<usize>,
}

impl UploadSession {
    pub fn new(session_id: String, filename: String, total_chunks: usize) -> Self {
        Self {
            session_id,
            filename,
            total_chunks,
            received_chunks: 0,
            started_at: Utc::now(),
            last_chunk_at: None,
            state: SessionState::Receiving,
            failure: None,
            artifact: None,
            received: BTreeSet::new(),
            assembly_claimed: false,
            missing_index: None,
        }
    }

    /// Check if every index has been recorded
    pub fn is_complete(&self) -> bool {
        self.received_chunks == self.total_chunks
    }

    /// Up to `limit` indices that have not been recorded yet, lowest first
    pub fn missing_chunks(&self, limit: usize) -> Vec<usize> {
        if limit == 0 {
            return Vec::new();
        }
        let mut missing = Vec::new();
        let mut expected = 0;
        for &index in self.received.range(..self.total_chunks) {
            missing.extend((expected..index).take(limit - missing.len()));
            if missing.len() == limit {
                return missing;
            }
            expected = index + 1;
        }
        missing.extend((expected..self.total_chunks).take(limit - missing.len()));
        missing
    }

    pub fn missing_count(&self) -> usize {
        self.total_chunks.saturating_sub(self.received_chunks)
    }

    /// Fraction of chunks received, in `0.0..=1.0`
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        self.received_chunks as f64 / self.total_chunks as f64
    }

    /// Most recent activity, used for idle sweeping
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_chunk_at.unwrap_or(self.started_at)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of accepting one chunk
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    /// Session snapshot after this chunk was recorded
    pub session: UploadSession,

    /// False when the index had already been recorded (re-delivery)
    pub newly_recorded: bool,

    /// Present only for the request that completed the transfer
    pub artifact: Option<Artifact>,
}

/// How an encrypted payload should be materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecryptMode {
    /// Store the plaintext as one artifact
    RawDecrypt,
    /// Treat the plaintext as a zip and extract it
    DecryptThenUnzip,
}

/// Result of processing an encrypted payload
#[derive(Debug, Clone)]
pub enum DecryptOutcome {
    Stored {
        artifact: Artifact,
        /// Plaintext length before padding was stripped
        original_len: usize,
    },
    Extracted {
        /// Directory (under the content root) holding the entries
        directory: String,
        entries: Vec<ExtractedEntry>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session {session_id} was started with {expected}, request has {actual}")]
    SessionMismatch {
        session_id: String,
        expected: String,
        actual: String,
    },

    #[error("Chunk index out of bounds: {index} (total: {total})")]
    ChunkIndexOutOfBounds { index: usize, total: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {session_id} is {state:?} and accepts no more chunks")]
    SessionClosed {
        session_id: String,
        state: SessionState,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SessionMismatch { .. } => StatusCode::CONFLICT,
            Self::ChunkIndexOutOfBounds { .. } => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionClosed { .. } => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Reassembly(ReassemblyError::MissingChunk { .. }) => StatusCode::CONFLICT,
            Self::Reassembly(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Decrypt(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Extract(ExtractError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Extract(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Artifact(ArtifactError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            Self::Artifact(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SessionMismatch { .. } => "SESSION_MISMATCH",
            Self::ChunkIndexOutOfBounds { .. } => "CHUNK_INDEX_OUT_OF_BOUNDS",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionClosed { .. } => "SESSION_CLOSED",
            Self::Store(_) => "STORE_ERROR",
            Self::Reassembly(ReassemblyError::MissingChunk { .. }) => "MISSING_CHUNK",
            Self::Reassembly(_) => "REASSEMBLY_ERROR",
            Self::Decrypt(_) => "DECRYPT_ERROR",
            Self::Extract(ExtractError::PathTraversal(_)) => "PATH_TRAVERSAL",
            Self::Extract(_) => "EXTRACT_ERROR",
            Self::Artifact(ArtifactError::InvalidName(_)) => "VALIDATION_ERROR",
            Self::Artifact(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
