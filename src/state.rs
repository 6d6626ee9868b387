//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::crypto::{provider_from_config, SecretError, SecretProvider};
use crate::storage::{ArtifactError, ArtifactStore};
use crate::upload::{ChunkStore, IngestService};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to load encryption secret: {0}")]
    Secret(#[from] SecretError),

    #[error("Failed to open content root: {0}")]
    Storage(#[from] ArtifactError),

    #[error("Failed to create chunk directory: {0}")]
    ChunkRoot(#[from] std::io::Error),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    ingest: IngestService,
}

impl AppState {
    /// Create state from configuration, opening both storage roots
    pub fn new(config: Config) -> Result<Self, StateError> {
        let secrets = provider_from_config(&config.crypto)?;
        Self::with_secrets(config, secrets)
    }

    /// Create state with an explicit key source
    pub fn with_secrets(
        config: Config,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self, StateError> {
        std::fs::create_dir_all(&config.storage.chunk_root)?;
        let artifacts = ArtifactStore::open(config.storage.content_root.clone())?;
        let chunks = ChunkStore::with_local_storage(config.storage.chunk_root.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                ingest: IngestService::new(chunks, artifacts, secrets)
                    .with_max_chunks(config.sessions.max_chunks),
                config,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the ingest service
    pub fn ingest(&self) -> &IngestService {
        &self.inner.ingest
    }
}
