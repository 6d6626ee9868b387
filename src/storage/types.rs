//! Storage types

use std::path::PathBuf;

/// A finished file in the content root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Unique name under the content root
    pub id: String,
    pub size: u64,
    /// Name the client sent, reduced to its last path component
    pub origin_filename: String,
    pub path: PathBuf,
}

/// Artifact store errors
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Invalid filename: {0:?}")]
    InvalidName(String),

    #[error("No free artifact name for {0}")]
    NameExhausted(String),

    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}
