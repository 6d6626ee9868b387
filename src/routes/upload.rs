//! Upload Routes
//!
//! JSON endpoints used by the existing web and CLI clients.
//!
//! Endpoints:
//! - POST /upload_encoded - Store one base64 payload
//! - POST /upload_chunked - Deliver one base64 chunk of a multi-chunk transfer
//! - POST /upload_encrypted - Decrypt a base64 payload and store it
//! - POST /upload_zip_encrypted - Decrypt a base64 payload and extract it as a zip
//! - GET /api/v1/upload/:session_id - Get session status
//! - DELETE /api/v1/upload/:session_id - Abort a transfer

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::archive::ExtractedEntry;
use crate::state::AppState;
use crate::upload::{DecryptMode, DecryptOutcome, SessionState, UploadError, UploadSession};

/// Cap on the missing indices listed in a status response
const MISSING_CHUNKS_LIMIT: usize = 100;

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    code: &'static str,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Upload request failed");
        } else {
            tracing::warn!(error = %self, "Upload request rejected");
        }

        let body = Json(ErrorResponse {
            success: false,
            message: self.to_string(),
            code: self.code(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedUploadRequest {
    pub filename: Option<String>,
    pub file_data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadRequest {
    pub filename: Option<String>,
    /// Defaults to `filename`
    pub file_id: Option<String>,
    pub chunk_index: Option<usize>,
    pub total_chunks: Option<usize>,
    pub chunk_data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedUploadRequest {
    pub filename: Option<String>,
    pub encrypted_data: Option<String>,
}

#[derive(Serialize)]
struct StoredResponse {
    success: bool,
    message: String,
    filename: String,
    size: u64,
    path: String,
}

#[derive(Serialize)]
struct ChunkResponse {
    success: bool,
    message: String,
    filename: String,
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptedResponse {
    success: bool,
    message: String,
    filename: String,
    file_info: FileInfo,
}

/// Field names kept as the legacy clients read them
#[derive(Serialize)]
struct FileInfo {
    name: String,
    original_name: String,
    size: u64,
    decrypted_size: usize,
    path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractedResponse {
    success: bool,
    message: String,
    directory: String,
    total_size: u64,
    files: Vec<ExtractedEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatusResponse {
    session_id: String,
    filename: String,
    state: SessionState,
    received_chunks: usize,
    total_chunks: usize,
    progress: f64,
    /// First missing indices, at most `MISSING_CHUNKS_LIMIT` of them
    missing_chunks: Vec<usize>,
    missing_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    started_at: chrono::DateTime<chrono::Utc>,
    last_chunk_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<UploadSession> for SessionStatusResponse {
    fn from(session: UploadSession) -> Self {
        Self {
            progress: (session.progress() * 100.0).round(),
            missing_chunks: session.missing_chunks(MISSING_CHUNKS_LIMIT),
            missing_count: session.missing_count(),
            session_id: session.session_id,
            filename: session.filename,
            state: session.state,
            received_chunks: session.received_chunks,
            total_chunks: session.total_chunks,
            failure: session.failure,
            started_at: session.started_at,
            last_chunk_at: session.last_chunk_at,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload_encoded", post(upload_encoded))
        .route("/upload_chunked", post(upload_chunked))
        .route("/upload_encrypted", post(upload_encrypted))
        .route("/upload_zip_encrypted", post(upload_zip_encrypted))
        .route(
            "/api/v1/upload/:session_id",
            get(get_session).delete(abort_session),
        )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload_encoded
async fn upload_encoded(
    State(state): State<AppState>,
    payload: Result<Json<EncodedUploadRequest>, JsonRejection>,
) -> Result<Json<StoredResponse>, UploadError> {
    let request = json_body(payload)?;
    let (Some(filename), Some(file_data)) = (request.filename, request.file_data) else {
        return Err(UploadError::Validation(
            "Missing required fields (filename, fileData)".into(),
        ));
    };

    tracing::info!(file_name = %filename, size = file_data.len(), "Processing file");
    let data = decode_base64(&file_data)?;

    let ingest = state.ingest().clone();
    let artifact = run_blocking(move || ingest.store_encoded(&filename, &data)).await?;

    Ok(Json(StoredResponse {
        success: true,
        message: "File received and saved successfully".into(),
        filename: artifact.id,
        size: artifact.size,
        path: artifact.path.display().to_string(),
    }))
}

/// POST /upload_chunked
async fn upload_chunked(
    State(state): State<AppState>,
    payload: Result<Json<ChunkUploadRequest>, JsonRejection>,
) -> Result<Json<ChunkResponse>, UploadError> {
    let request = json_body(payload)?;
    let (Some(filename), Some(chunk_index), Some(total_chunks), Some(chunk_data)) = (
        request.filename,
        request.chunk_index,
        request.total_chunks,
        request.chunk_data,
    ) else {
        return Err(UploadError::Validation(
            "Missing required fields (filename, chunkData, chunkIndex, totalChunks)".into(),
        ));
    };
    let session_id = request.file_id.unwrap_or_else(|| filename.clone());

    tracing::debug!(
        session_id = %session_id,
        chunk_index,
        total_chunks,
        "Processing chunk"
    );
    let data = decode_base64(&chunk_data)?;

    let ingest = state.ingest().clone();
    let name = filename.clone();
    let outcome = run_blocking(move || {
        ingest.begin_or_record_chunk(&session_id, &name, chunk_index, total_chunks, &data)
    })
    .await?;

    let response = match outcome.artifact {
        Some(artifact) => ChunkResponse {
            success: true,
            message: "File chunks received and reassembled successfully".into(),
            filename: artifact.id,
            completed: true,
            progress: None,
            size: Some(artifact.size),
            path: Some(artifact.path.display().to_string()),
        },
        None => ChunkResponse {
            success: true,
            message: format!("Chunk {}/{} received successfully", chunk_index + 1, total_chunks),
            filename,
            completed: false,
            progress: Some(outcome.session.progress()),
            size: None,
            path: None,
        },
    };

    Ok(Json(response))
}

/// POST /upload_encrypted
async fn upload_encrypted(
    State(state): State<AppState>,
    payload: Result<Json<EncryptedUploadRequest>, JsonRejection>,
) -> Result<Json<DecryptedResponse>, UploadError> {
    let (filename, data) = encrypted_fields(json_body(payload)?)?;

    let ingest = state.ingest().clone();
    let name = filename.clone();
    let outcome =
        run_blocking(move || ingest.decrypt_and_maybe_extract(&data, &name, DecryptMode::RawDecrypt))
            .await?;

    let DecryptOutcome::Stored {
        artifact,
        original_len,
    } = outcome
    else {
        return Err(UploadError::Internal("unexpected extraction result".into()));
    };

    let path = artifact.path.display().to_string();
    Ok(Json(DecryptedResponse {
        success: true,
        message: "Encrypted file received and decrypted successfully".into(),
        filename: artifact.id.clone(),
        file_info: FileInfo {
            name: artifact.id,
            original_name: original_name(&artifact.origin_filename).to_string(),
            size: artifact.size,
            decrypted_size: original_len,
            path,
        },
    }))
}

/// POST /upload_zip_encrypted
async fn upload_zip_encrypted(
    State(state): State<AppState>,
    payload: Result<Json<EncryptedUploadRequest>, JsonRejection>,
) -> Result<Json<ExtractedResponse>, UploadError> {
    let (filename, data) = encrypted_fields(json_body(payload)?)?;

    let ingest = state.ingest().clone();
    let outcome = run_blocking(move || {
        ingest.decrypt_and_maybe_extract(&data, &filename, DecryptMode::DecryptThenUnzip)
    })
    .await?;

    let DecryptOutcome::Extracted { directory, entries } = outcome else {
        return Err(UploadError::Internal("unexpected raw result".into()));
    };

    Ok(Json(ExtractedResponse {
        success: true,
        message: format!("Encrypted archive extracted ({} files)", entries.len()),
        directory,
        total_size: entries.iter().map(|e| e.size).sum(),
        files: entries,
    }))
}

/// GET /api/v1/upload/:session_id
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, UploadError> {
    let session = state.ingest().session_status(&session_id)?;
    Ok(Json(session.into()))
}

/// DELETE /api/v1/upload/:session_id
async fn abort_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, UploadError> {
    let ingest = state.ingest().clone();
    run_blocking(move || ingest.abort_session(&session_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn json_body<T: DeserializeOwned>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, UploadError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| UploadError::Validation(e.body_text()))
}

/// Name reported as `original_name`: the part before the first underscore
fn original_name(filename: &str) -> &str {
    filename
        .split_once('_')
        .map_or(filename, |(head, _)| head)
}

fn encrypted_fields(request: EncryptedUploadRequest) -> Result<(String, Vec<u8>), UploadError> {
    let (Some(filename), Some(encrypted_data)) = (request.filename, request.encrypted_data) else {
        return Err(UploadError::Validation(
            "Missing required fields (filename, encryptedData)".into(),
        ));
    };

    tracing::info!(
        file_name = %filename,
        size = encrypted_data.len(),
        "Processing encrypted file"
    );
    Ok((filename, decode_base64(&encrypted_data)?))
}

/// Decode a base64 field, accepting a `data:<mime>;base64,` prefix
pub(crate) fn decode_base64(field: &str) -> Result<Vec<u8>, UploadError> {
    let body = match field.find(";base64,") {
        Some(pos) if field.starts_with("data:") => &field[pos + ";base64,".len()..],
        _ => field,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=')))
        .map_err(|e| UploadError::Validation(format!("Invalid base64 data: {}", e)))
}

/// Run a blocking core call off the async executor
async fn run_blocking<T, F>(f: F) -> Result<T, UploadError>
where
    F: FnOnce() -> Result<T, UploadError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| UploadError::Internal(format!("worker task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_variants() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("aGVs\nbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("aGVsbG8").unwrap(), b"hello");
        assert_eq!(
            decode_base64("data:application/octet-stream;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
        assert!(matches!(
            decode_base64("!!not base64!!"),
            Err(UploadError::Validation(_))
        ));
    }

    #[test]
    fn test_status_response_progress_is_percent() {
        let mut session = UploadSession::new("s".into(), "a.bin".into(), 4);
        session.received.insert(0);
        session.received_chunks = 1;

        let response = SessionStatusResponse::from(session);
        assert_eq!(response.progress, 25.0);
        assert_eq!(response.missing_chunks, vec![1, 2, 3]);
        assert_eq!(response.missing_count, 3);
    }

    #[test]
    fn test_status_response_lists_bounded_missing_chunks() {
        let session = UploadSession::new("s".into(), "a.bin".into(), 1_000_000);

        let response = SessionStatusResponse::from(session);
        assert_eq!(response.missing_chunks.len(), MISSING_CHUNKS_LIMIT);
        assert_eq!(response.missing_chunks[99], 99);
        assert_eq!(response.missing_count, 1_000_000);
    }

    #[test]
    fn test_original_name_takes_prefix() {
        assert_eq!(original_name("report.txt"), "report.txt");
        assert_eq!(original_name("my_report.txt"), "my");
        assert_eq!(original_name("a_b_c.txt"), "a");
        assert_eq!(original_name("_x.txt"), "");
    }
}
