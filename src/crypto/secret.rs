//! Key material
//!
//! The AES key is SHA-256 over the decoded shared secret. Where the secret
//! comes from is behind [`SecretProvider`], so it can be swapped or rotated
//! through configuration alone.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::config::CryptoConfig;

/// Secret loading errors
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret is not valid base64: {0}")]
    InvalidEncoding(String),

    #[error("Secret is empty")]
    Empty,

    #[error("Failed to read secret file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No secret configured")]
    NotConfigured,
}

/// 32-byte AES-256 key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// SHA-256 over raw secret bytes
    pub fn derive(secret: &[u8]) -> Self {
        Self(Sha256::digest(secret).into())
    }

    /// Decode base64 secret text, then derive
    ///
    /// Excess trailing `=` is tolerated; the long-standing client secret
    /// carries padding it does not need.
    pub fn from_base64_secret(text: &str) -> Result<Self, SecretError> {
        let trimmed = text.trim().trim_end_matches('=');
        if trimmed.is_empty() {
            return Err(SecretError::Empty);
        }
        let secret = STANDARD_NO_PAD
            .decode(trimmed)
            .map_err(|e| SecretError::InvalidEncoding(e.to_string()))?;
        Ok(Self::derive(&secret))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Source of the current decryption key
pub trait SecretProvider: Send + Sync {
    fn current_key(&self) -> Result<EncryptionKey, SecretError>;
}

/// Key fixed at startup
pub struct StaticSecret {
    key: EncryptionKey,
}

impl StaticSecret {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    pub fn from_base64(text: &str) -> Result<Self, SecretError> {
        Ok(Self::new(EncryptionKey::from_base64_secret(text)?))
    }
}

impl SecretProvider for StaticSecret {
    fn current_key(&self) -> Result<EncryptionKey, SecretError> {
        Ok(self.key.clone())
    }
}

/// Secret read from a file on every use, so replacing the file rotates it
pub struct FileSecret {
    path: PathBuf,
}

impl FileSecret {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SecretProvider for FileSecret {
    fn current_key(&self) -> Result<EncryptionKey, SecretError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| SecretError::Unreadable {
            path: self.path.clone(),
            source,
        })?;
        EncryptionKey::from_base64_secret(&text)
    }
}

/// Build the provider named by configuration; a secret file wins over an inline secret
pub fn provider_from_config(config: &CryptoConfig) -> Result<Arc<dyn SecretProvider>, SecretError> {
    if let Some(path) = &config.secret_file {
        let provider = FileSecret::new(path.clone());
        provider.current_key()?;
        return Ok(Arc::new(provider));
    }

    match &config.secret {
        Some(text) => Ok(Arc::new(StaticSecret::from_base64(text)?)),
        None => Err(SecretError::NotConfigured),
    }
}
