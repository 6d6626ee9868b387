//! HTTP-level tests for the upload endpoints

use std::io::{Cursor, Write};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use filedrop_server::config::Config;
use filedrop_server::crypto::{self, EncryptionKey, StaticSecret};
use filedrop_server::state::AppState;

const LEGACY_SECRET: &str = "VGhpc0lzQVNlY3JldEtleUZvckRlbW9Pbmx5ISEh==";

fn test_app(temp_dir: &TempDir) -> Router {
    let mut config = Config::default();
    config.storage.content_root = temp_dir.path().join("uploads");
    config.storage.chunk_root = temp_dir.path().join("chunks");
    config.crypto.secret = Some(LEGACY_SECRET.to_string());

    let state = AppState::new(config).unwrap();
    filedrop_server::app(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn legacy_key() -> EncryptionKey {
    EncryptionKey::from_base64_secret(LEGACY_SECRET).unwrap()
}

#[tokio::test]
async fn test_health() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["activeSessions"], 0);
}

#[tokio::test]
async fn test_upload_encoded() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let (status, body) = send(
        &app,
        "POST",
        "/upload_encoded",
        Some(json!({
            "filename": "hello.txt",
            "fileData": format!("data:text/plain;base64,{}", STANDARD.encode(b"hello world")),
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["size"], 11);
    let path = body["path"].as_str().unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"hello world");
    assert!(body["filename"].as_str().unwrap().ends_with("_hello.txt"));
}

#[tokio::test]
async fn test_upload_encoded_missing_fields() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let (status, body) = send(&app, "POST", "/upload_encoded", Some(json!({ "filename": "a" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &app,
        "POST",
        "/upload_encoded",
        Some(json!({ "filename": "a", "fileData": "%%%" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("Invalid base64"));
}

#[tokio::test]
async fn test_chunked_upload_flow() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let parts: [&[u8]; 3] = [b"one-", b"two-", b"three"];
    let mut last = Value::Null;

    // Arrive out of order, with one duplicate delivery
    for index in [2usize, 0, 0, 1] {
        let (status, body) = send(
            &app,
            "POST",
            "/upload_chunked",
            Some(json!({
                "filename": "story.txt",
                "fileId": "story-1",
                "chunkIndex": index,
                "totalChunks": 3,
                "chunkData": STANDARD.encode(parts[index]),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        last = body;
    }

    assert_eq!(last["completed"], true);
    assert_eq!(last["size"], 13);
    let path = last["path"].as_str().unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"one-two-three");

    let (status, body) = send(&app, "GET", "/api/v1/upload/story-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "complete");
    assert_eq!(body["receivedChunks"], 3);
}

#[tokio::test]
async fn test_chunk_progress_and_abort() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    // fileId falls back to the filename
    let (status, body) = send(
        &app,
        "POST",
        "/upload_chunked",
        Some(json!({
            "filename": "big.bin",
            "chunkIndex": 0,
            "totalChunks": 4,
            "chunkData": STANDARD.encode([1u8; 64]),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completed"], false);
    assert_eq!(body["progress"], 0.25);

    let (status, body) = send(&app, "GET", "/api/v1/upload/big.bin", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["missingChunks"], json!([1, 2, 3]));
    assert_eq!(body["missingCount"], 3);

    let (status, _) = send(&app, "DELETE", "/api/v1/upload/big.bin", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", "/api/v1/upload/big.bin", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_huge_chunk_count_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let (status, body) = send(
        &app,
        "POST",
        "/upload_chunked",
        Some(json!({
            "filename": "huge.bin",
            "fileId": "huge",
            "chunkIndex": 0,
            "totalChunks": 1_000_000_000_000u64,
            "chunkData": STANDARD.encode(b"x"),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(&app, "GET", "/api/v1/upload/huge", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_status_lists_a_bounded_window_of_missing_chunks() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let (status, _) = send(
        &app,
        "POST",
        "/upload_chunked",
        Some(json!({
            "filename": "wide.bin",
            "chunkIndex": 0,
            "totalChunks": 50_000,
            "chunkData": STANDARD.encode(b"x"),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", "/api/v1/upload/wide.bin", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["missingCount"], 49_999);
    let missing = body["missingChunks"].as_array().unwrap();
    assert_eq!(missing.len(), 100);
    assert_eq!(missing[0], 1);
}

#[tokio::test]
async fn test_retry_after_complete_returns_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let chunk = |index: usize, total: usize| {
        json!({
            "filename": "twice.txt",
            "fileId": "twice",
            "chunkIndex": index,
            "totalChunks": total,
            "chunkData": STANDARD.encode([b'a' + index as u8]),
        })
    };

    send(&app, "POST", "/upload_chunked", Some(chunk(0, 2))).await;
    let (_, done) = send(&app, "POST", "/upload_chunked", Some(chunk(1, 2))).await;
    assert_eq!(done["completed"], true);

    let (status, retry) = send(&app, "POST", "/upload_chunked", Some(chunk(1, 2))).await;
    assert_eq!(status, StatusCode::OK, "{}", retry);
    assert_eq!(retry["completed"], true);
    assert_eq!(retry["filename"], done["filename"]);

    let (_, status_body) = send(&app, "GET", "/api/v1/upload/twice", None).await;
    assert_eq!(status_body["state"], "complete");

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["activeSessions"], 0);
}

#[tokio::test]
async fn test_chunk_mismatch_is_conflict() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let chunk = |total: usize| {
        json!({
            "filename": "m.bin",
            "fileId": "m",
            "chunkIndex": 0,
            "totalChunks": total,
            "chunkData": STANDARD.encode(b"x"),
        })
    };

    let (status, _) = send(&app, "POST", "/upload_chunked", Some(chunk(3))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/upload_chunked", Some(chunk(4))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SESSION_MISMATCH");
}

#[tokio::test]
async fn test_upload_encrypted() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let payload = crypto::encrypt(b"classified report", &legacy_key(), &[3u8; 16]);
    let (status, body) = send(
        &app,
        "POST",
        "/upload_encrypted",
        Some(json!({ "filename": "report.txt", "encryptedData": STANDARD.encode(&payload) })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["fileInfo"]["original_name"], "report.txt");
    assert_eq!(body["fileInfo"]["size"], 17);
    let path = body["fileInfo"]["path"].as_str().unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"classified report");
}

#[tokio::test]
async fn test_upload_encrypted_original_name_prefix() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let payload = crypto::encrypt(b"q3", &legacy_key(), &[4u8; 16]);
    let (status, body) = send(
        &app,
        "POST",
        "/upload_encrypted",
        Some(json!({ "filename": "quarterly_report.txt", "encryptedData": STANDARD.encode(&payload) })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["fileInfo"]["original_name"], "quarterly");
    assert!(body["fileInfo"]["name"]
        .as_str()
        .unwrap()
        .ends_with("_quarterly_report.txt"));
}

#[tokio::test]
async fn test_upload_encrypted_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let (status, body) = send(
        &app,
        "POST",
        "/upload_encrypted",
        Some(json!({ "filename": "x.bin", "encryptedData": STANDARD.encode([0u8; 8]) })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "DECRYPT_ERROR");
}

#[tokio::test]
async fn test_upload_zip_encrypted() {
    use zip::{write::SimpleFileOptions, ZipWriter};

    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in [("a.txt", "alpha"), ("dir/b.txt", "beta"), ("dir/c.txt", "gamma")] {
        zip.start_file(name, options).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    let archive = zip.finish().unwrap().into_inner();

    let payload = crypto::encrypt(&archive, &legacy_key(), &[5u8; 16]);
    let (status, body) = send(
        &app,
        "POST",
        "/upload_zip_encrypted",
        Some(json!({ "filename": "bundle.zip", "encryptedData": STANDARD.encode(&payload) })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["files"].as_array().unwrap().len(), 3);
    assert_eq!(body["totalSize"], 14);
    assert_eq!(body["files"][1]["relativePath"], "dir/b.txt");

    let directory = body["directory"].as_str().unwrap();
    let extracted = temp_dir.path().join("uploads").join(directory).join("dir/c.txt");
    assert_eq!(std::fs::read(extracted).unwrap(), b"gamma");
}

#[tokio::test]
async fn test_file_secret_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let secret_path = temp_dir.path().join("secret");
    std::fs::write(&secret_path, "YWFhYQ==").unwrap();

    let mut config = Config::default();
    config.storage.content_root = temp_dir.path().join("uploads");
    config.storage.chunk_root = temp_dir.path().join("chunks");
    config.crypto.secret_file = Some(secret_path.clone());
    let app = filedrop_server::app(AppState::new(config).unwrap());

    std::fs::write(&secret_path, "YmJiYg==").unwrap();
    let payload = crypto::encrypt(b"rotated", &EncryptionKey::derive(b"bbbb"), &[0u8; 16]);

    let (status, body) = send(
        &app,
        "POST",
        "/upload_encrypted",
        Some(json!({ "filename": "r.txt", "encryptedData": STANDARD.encode(&payload) })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let path = body["fileInfo"]["path"].as_str().unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"rotated");
}

#[tokio::test]
async fn test_explicit_secret_provider() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.content_root = temp_dir.path().join("uploads");
    config.storage.chunk_root = temp_dir.path().join("chunks");

    let key = EncryptionKey::derive(b"injected");
    let state = AppState::with_secrets(config, Arc::new(StaticSecret::new(key.clone()))).unwrap();
    let app = filedrop_server::app(state);

    let payload = crypto::encrypt(b"ok", &key, &[0u8; 16]);
    let (status, _) = send(
        &app,
        "POST",
        "/upload_encrypted",
        Some(json!({ "filename": "k.txt", "encryptedData": STANDARD.encode(&payload) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
