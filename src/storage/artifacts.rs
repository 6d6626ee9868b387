//! Artifact store
//!
//! Finished files live directly under the content root. Everything is first
//! written under `<content_root>/.staging` and only moved into place once it
//! is complete, so readers never observe a partial artifact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::{NamedTempFile, TempDir};
use uuid::Uuid;

use super::types::{Artifact, ArtifactError};

const STAGING_DIR: &str = ".staging";

/// Attempts at finding a free name before giving up
const MAX_NAME_ATTEMPTS: usize = 8;

/// A file being written in the staging area
pub struct StagedArtifact {
    file: NamedTempFile,
    written: u64,
}

impl StagedArtifact {
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }
}

/// Content root for finished artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    content_root: PathBuf,
    staging_root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) the content root
    pub fn open(content_root: PathBuf) -> Result<Self, ArtifactError> {
        let staging_root = content_root.join(STAGING_DIR);
        fs::create_dir_all(&staging_root)?;

        Ok(Self {
            content_root,
            staging_root,
        })
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    /// Store a complete in-memory payload as one artifact
    pub fn store_bytes(&self, filename: &str, data: &[u8]) -> Result<Artifact, ArtifactError> {
        let filename = sanitize_filename(filename)?;
        let mut staged = self.stage()?;
        staged.write_all(data)?;
        self.commit(staged, &filename)
    }

    /// Start a new staged file
    pub fn stage(&self) -> Result<StagedArtifact, ArtifactError> {
        Ok(StagedArtifact {
            file: NamedTempFile::new_in(&self.staging_root)?,
            written: 0,
        })
    }

    /// Flush a staged file to disk and publish it under a unique name
    ///
    /// Never replaces an existing artifact.
    pub fn commit(
        &self,
        staged: StagedArtifact,
        origin_filename: &str,
    ) -> Result<Artifact, ArtifactError> {
        let filename = sanitize_filename(origin_filename)?;
        let size = staged.written;

        let mut file = staged.file;
        file.as_file_mut().flush()?;
        file.as_file().sync_all()?;

        let mut name = unique_name(&filename, false);
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self.content_root.join(&name);
            match file.persist_noclobber(&path) {
                Ok(_) => {
                    tracing::info!(artifact = %name, size, "Artifact stored");
                    return Ok(Artifact {
                        id: name,
                        size,
                        origin_filename: filename,
                        path,
                    });
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    file = e.file;
                    name = unique_name(&filename, true);
                }
                Err(e) => return Err(e.error.into()),
            }
        }

        Err(ArtifactError::NameExhausted(filename))
    }

    /// Create an empty staging directory
    pub fn stage_dir(&self) -> Result<TempDir, ArtifactError> {
        Ok(tempfile::Builder::new()
            .prefix("extract-")
            .tempdir_in(&self.staging_root)?)
    }

    /// Move a staged directory into the content root under a unique name
    ///
    /// Returns the directory name relative to the content root.
    pub fn commit_dir(&self, staged: TempDir, origin_filename: &str) -> Result<String, ArtifactError> {
        let filename = sanitize_filename(origin_filename)?;
        let stem = Path::new(&filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&filename)
            .to_string();

        let mut name = unique_name(&stem, false);
        for _ in 0..MAX_NAME_ATTEMPTS {
            let target = self.content_root.join(&name);
            // Claim the name first; rename then replaces the empty placeholder
            match fs::create_dir(&target) {
                Ok(()) => {
                    if let Err(e) = fs::rename(staged.path(), &target) {
                        let _ = fs::remove_dir(&target);
                        return Err(e.into());
                    }
                    tracing::info!(directory = %name, "Extracted directory stored");
                    return Ok(name);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    name = unique_name(&stem, true);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ArtifactError::NameExhausted(filename))
    }
}

/// Reduce a client-supplied name to a bare file name
pub fn sanitize_filename(name: &str) -> Result<String, ArtifactError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();

    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }

    Ok(base.to_string())
}

/// `YYYYmmddHHMMSS_<name>`, with a random tag when the plain form is taken
fn unique_name(filename: &str, tagged: bool) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    if tagged {
        let tag = Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}", timestamp, &tag[..8], filename)
    } else {
        format!("{}_{}", timestamp, filename)
    }
}
