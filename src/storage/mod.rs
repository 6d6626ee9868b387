//! Storage module for finished artifacts
//!
//! Staged writes, unique naming and atomic publication into the content root.

mod artifacts;
mod types;

pub use artifacts::{sanitize_filename, ArtifactStore, StagedArtifact};
pub use types::*;
