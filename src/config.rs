//! Configuration management for Filedrop Server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::upload::DEFAULT_MAX_CHUNKS;

/// Default request body limit: 512MB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Where finished artifacts become visible
    pub content_root: PathBuf,
    /// Scratch space for in-flight chunks
    pub chunk_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CryptoConfig {
    /// Base64 text of the shared secret
    pub secret: Option<String>,
    /// File holding the base64 secret, re-read on every use
    pub secret_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Largest `totalChunks` a client may declare
    pub max_chunks: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No encryption secret configured (set ENCRYPTION_KEY or ENCRYPTION_KEY_FILE)")]
    MissingSecret,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            },
            storage: StorageConfig {
                content_root: PathBuf::from("./uploads"),
                chunk_root: PathBuf::from("./chunks"),
            },
            crypto: CryptoConfig {
                secret: None,
                secret_file: None,
            },
            sessions: SessionConfig {
                idle_timeout: Duration::from_secs(24 * 60 * 60),
                sweep_interval: Duration::from_secs(300),
                max_chunks: DEFAULT_MAX_CHUNKS,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.server.max_upload_bytes),
            },
            storage: StorageConfig {
                content_root: env::var("STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.content_root),
                chunk_root: env::var("CHUNKS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.chunk_root),
            },
            crypto: CryptoConfig {
                secret: env::var("ENCRYPTION_KEY").ok().filter(|s| !s.is_empty()),
                secret_file: env::var("ENCRYPTION_KEY_FILE").ok().map(PathBuf::from),
            },
            sessions: SessionConfig {
                idle_timeout: Duration::from_secs(parse_var(
                    "SESSION_IDLE_SECS",
                    defaults.sessions.idle_timeout.as_secs(),
                )),
                sweep_interval: Duration::from_secs(parse_var(
                    "SESSION_SWEEP_SECS",
                    defaults.sessions.sweep_interval.as_secs(),
                )),
                max_chunks: parse_var("MAX_CHUNKS", defaults.sessions.max_chunks),
            },
        };

        if config.crypto.secret.is_none() && config.crypto.secret_file.is_none() {
            return Err(ConfigError::MissingSecret);
        }

        Ok(config)
    }
}

/// Read a numeric variable, keeping the default when absent or malformed
fn parse_var<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, "Ignoring malformed value, using default");
            default
        }),
        Err(_) => default,
    }
}
