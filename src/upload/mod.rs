//! File Ingest Module
//!
//! Accepts files three ways:
//! - Single base64 payloads, stored as one artifact
//! - Chunked transfers tracked per session and reassembled once complete
//! - AES-256-CBC encrypted payloads, stored raw or extracted as a zip
//!
//! Chunk Flow:
//! 1. First chunk for a session id creates the session
//! 2. Each chunk is stored durably, then counted once per distinct index
//! 3. The request that delivers the last missing index reassembles the file
//! 4. Chunks are purged once the artifact is published

pub mod chunk_store;
pub mod reassembly;
pub mod service;
pub mod session;
pub mod types;

pub use chunk_store::{ChunkStorage, ChunkStore, StoreError};
pub use reassembly::{Reassembler, ReassemblyError};
pub use service::IngestService;
pub use session::{ChunkRecord, SessionManager, DEFAULT_MAX_CHUNKS};
pub use types::*;
