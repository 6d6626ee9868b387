//! Filedrop Server Library
//!
//! File ingest over HTTP: single base64 payloads, chunked transfers
//! reassembled server-side, and AES-256-CBC encrypted payloads that are
//! stored raw or extracted as zip archives.
//!
//! # Modules
//!
//! - `upload`: Session tracking, chunk storage, reassembly and the ingest service
//! - `crypto`: Key derivation and the decrypt pipeline
//! - `archive`: Zip extraction with path validation
//! - `storage`: Artifact naming, staging and publishing
//! - `routes`: Axum handlers for the legacy JSON endpoints

pub mod archive;
pub mod config;
pub mod crypto;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config().server.max_upload_bytes;

    Router::new()
        .merge(routes::health::router())
        .merge(routes::upload::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
