//! Upload Session Manager
//!
//! Registry of in-flight chunked transfers. Each session sits behind its own
//! mutex so that recording a chunk and checking for completeness is one
//! atomic step per session, while different sessions never contend beyond
//! the short registry lookup.
//!
//! Lock order is always registry, then session.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::storage::Artifact;

use super::types::{SessionState, UploadError, UploadSession};

type SessionHandle = Arc<Mutex<UploadSession>>;

/// What happened when a chunk index was recorded
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub session: UploadSession,

    /// False for a re-delivered index
    pub newly_recorded: bool,

    /// True for exactly one caller per session: the one that must reassemble
    pub ready_for_reassembly: bool,
}

// ============================================================================
// Session Manager
// ============================================================================

/// Default upper bound on `total_chunks` for one session
pub const DEFAULT_MAX_CHUNKS: usize = 100_000;

/// Manages upload sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    /// Sessions indexed by session id
    sessions: Mutex<HashMap<String, SessionHandle>>,
    max_chunks: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::with_max_chunks(DEFAULT_MAX_CHUNKS)
    }
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session manager accepting at most `max_chunks` chunks per session
    pub fn with_max_chunks(max_chunks: usize) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                sessions: Mutex::new(HashMap::new()),
                max_chunks,
            }),
        }
    }

    fn handle(&self, session_id: &str) -> Result<SessionHandle, UploadError> {
        self.inner
            .sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Create the session on first sight, otherwise return it unchanged
    ///
    /// A request whose filename or chunk count disagrees with a receiving
    /// session is rejected. When the previous incarnation of `session_id`
    /// is terminal, a fresh one replaces it; after a failed reassembly with
    /// the same shape, the recorded indices minus the missing one carry over.
    pub fn begin_or_get(
        &self,
        session_id: &str,
        filename: &str,
        total_chunks: usize,
    ) -> Result<UploadSession, UploadError> {
        self.begin_or_resume(session_id, filename, total_chunks, None)
    }

    /// Like [`begin_or_get`](Self::begin_or_get), but a restart after a
    /// failed reassembly carries over exactly `stored`, the indices still
    /// present in the chunk store.
    pub fn begin_or_resume(
        &self,
        session_id: &str,
        filename: &str,
        total_chunks: usize,
        stored: Option<&BTreeSet<usize>>,
    ) -> Result<UploadSession, UploadError> {
        if session_id.is_empty() {
            return Err(UploadError::Validation("session id must not be empty".into()));
        }
        if filename.is_empty() {
            return Err(UploadError::Validation("filename must not be empty".into()));
        }
        if total_chunks == 0 {
            return Err(UploadError::Validation("totalChunks must be positive".into()));
        }
        if total_chunks > self.inner.max_chunks {
            return Err(UploadError::Validation(format!(
                "totalChunks {} exceeds the limit of {}",
                total_chunks, self.inner.max_chunks
            )));
        }

        let mut sessions = self.inner.sessions.lock();

        if let Some(handle) = sessions.get(session_id) {
            let existing = handle.lock();

            if existing.state == SessionState::Receiving {
                if existing.total_chunks != total_chunks {
                    return Err(UploadError::SessionMismatch {
                        session_id: session_id.to_string(),
                        expected: format!("totalChunks={}", existing.total_chunks),
                        actual: format!("totalChunks={}", total_chunks),
                    });
                }
                if existing.filename != filename {
                    return Err(UploadError::SessionMismatch {
                        session_id: session_id.to_string(),
                        expected: format!("filename={}", existing.filename),
                        actual: format!("filename={}", filename),
                    });
                }
                return Ok(existing.clone());
            }

            let mut fresh =
                UploadSession::new(session_id.to_string(), filename.to_string(), total_chunks);

            if existing.state == SessionState::Failed
                && existing.filename == filename
                && existing.total_chunks == total_chunks
            {
                fresh.received = match stored {
                    Some(stored) => stored.range(..total_chunks).copied().collect(),
                    None => {
                        let mut received = existing.received.clone();
                        if let Some(missing) = existing.missing_index {
                            received.remove(&missing);
                        }
                        received
                    }
                };
                fresh.received_chunks = fresh.received.len();
            }

            tracing::info!(
                session_id,
                previous_state = ?existing.state,
                carried_chunks = fresh.received_chunks,
                "Restarting upload session"
            );

            drop(existing);
            sessions.insert(session_id.to_string(), Arc::new(Mutex::new(fresh.clone())));
            return Ok(fresh);
        }

        let session =
            UploadSession::new(session_id.to_string(), filename.to_string(), total_chunks);
        sessions.insert(session_id.to_string(), Arc::new(Mutex::new(session.clone())));

        tracing::info!(
            session_id,
            file_name = %filename,
            total_chunks,
            "Created upload session"
        );

        Ok(session)
    }

    /// Record that `index` is stored
    ///
    /// Counts each distinct index once. The call that brings the count to
    /// `total_chunks` claims reassembly; every other call sees
    /// `ready_for_reassembly == false`.
    pub fn record_chunk_received(
        &self,
        session_id: &str,
        index: usize,
    ) -> Result<ChunkRecord, UploadError> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock();

        if session.state.is_terminal() {
            return Err(UploadError::SessionClosed {
                session_id: session_id.to_string(),
                state: session.state,
            });
        }

        if index >= session.total_chunks {
            return Err(UploadError::ChunkIndexOutOfBounds {
                index,
                total: session.total_chunks,
            });
        }

        let newly_recorded = session.received.insert(index);
        if newly_recorded {
            session.received_chunks += 1;
        }
        session.last_chunk_at = Some(Utc::now());

        let ready_for_reassembly = session.is_complete() && !session.assembly_claimed;
        if ready_for_reassembly {
            session.assembly_claimed = true;
        }

        Ok(ChunkRecord {
            session: session.clone(),
            newly_recorded,
            ready_for_reassembly,
        })
    }

    /// Transition a claimed session to `Complete`
    pub fn mark_complete(
        &self,
        session_id: &str,
        artifact: &Artifact,
    ) -> Result<UploadSession, UploadError> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock();

        if session.state.is_terminal() {
            return Err(UploadError::SessionClosed {
                session_id: session_id.to_string(),
                state: session.state,
            });
        }

        session.state = SessionState::Complete;
        session.artifact = Some(artifact.clone());

        tracing::info!(
            session_id,
            file_name = %session.filename,
            "Upload session completed"
        );

        Ok(session.clone())
    }

    /// Transition a claimed session to `Failed`
    pub fn mark_failed(
        &self,
        session_id: &str,
        reason: &str,
        missing_index: Option<usize>,
    ) -> Result<UploadSession, UploadError> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock();

        if session.state.is_terminal() {
            return Err(UploadError::SessionClosed {
                session_id: session_id.to_string(),
                state: session.state,
            });
        }

        session.state = SessionState::Failed;
        session.failure = Some(reason.to_string());
        session.missing_index = missing_index;

        tracing::warn!(
            session_id,
            file_name = %session.filename,
            reason,
            "Upload session failed"
        );

        Ok(session.clone())
    }

    /// Remove a session from the registry
    pub fn abort(&self, session_id: &str) -> Result<UploadSession, UploadError> {
        let handle = self
            .inner
            .sessions
            .lock()
            .remove(session_id)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

        let session = handle.lock().clone();

        tracing::info!(
            session_id,
            file_name = %session.filename,
            "Upload session aborted"
        );

        Ok(session)
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Snapshot of a session
    pub fn status(&self, session_id: &str) -> Result<UploadSession, UploadError> {
        Ok(self.handle(session_id)?.lock().clone())
    }

    /// Snapshot of a completed session that a re-delivered chunk belongs to
    ///
    /// Index 0 or a different shape starts a new transfer and yields `None`.
    pub fn completed_delivery(
        &self,
        session_id: &str,
        filename: &str,
        total_chunks: usize,
        chunk_index: usize,
    ) -> Option<UploadSession> {
        let handle = self.handle(session_id).ok()?;
        let session = handle.lock();

        let same_transfer = session.state == SessionState::Complete
            && chunk_index != 0
            && session.filename == filename
            && session.total_chunks == total_chunks;

        same_transfer.then(|| session.clone())
    }

    /// Sessions still accepting chunks
    pub fn active_session_count(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .values()
            .filter(|h| h.lock().state == SessionState::Receiving)
            .count()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Drop sessions with no activity for `max_idle`
    ///
    /// Sessions whose reassembly is in progress are left alone. Returns the
    /// removed sessions so the caller can purge their chunks.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<UploadSession> {
        let max_idle = chrono::Duration::from_std(max_idle)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = Utc::now() - max_idle;

        let mut sessions = self.inner.sessions.lock();
        let mut removed = Vec::new();

        sessions.retain(|_, handle| {
            let session = handle.lock();
            let assembling = session.state == SessionState::Receiving && session.assembly_claimed;
            if !assembling && session.last_activity() <= cutoff {
                removed.push(session.clone());
                false
            } else {
                true
            }
        });

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Swept idle upload sessions");
        }

        removed
    }
}

// ============================================================================
// Tests
// ============================================================================
