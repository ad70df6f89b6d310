//! Wire contract of `FalClient` against a local mock of the fal endpoints

mod common;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use common::{encode, solid};
use image::ImageFormat;
use mask_recontext::{
    EditJob, EditService, FalClient, RecontextError, Recontextualizer, ServiceConfig,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const API_KEY: &str = "test-key";
const APP: &str = "fal-ai/nano-banana-pro";

#[derive(Default)]
struct Behaviour {
    job_error: Option<String>,
    no_images: bool,
}

#[derive(Default)]
struct MockFal {
    base_url: String,
    behaviour: Behaviour,
    files: Mutex<HashMap<String, Vec<u8>>>,
    initiated: Mutex<Vec<Value>>,
    submitted: Mutex<Vec<Value>>,
    status_polls: AtomicUsize,
}

type Shared = State<Arc<MockFal>>;

fn authorized(headers: &HeaderMap) -> Result<(), StatusCode> {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == format!("Key {}", API_KEY) => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn initiate(
    State(mock): Shared,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    if query.get("storage_type").map(String::as_str) != Some("fal-cdn-v3") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let name = body["file_name"].as_str().unwrap_or("upload").to_string();
    mock.initiated.lock().unwrap().push(body);
    Ok(Json(json!({
        "upload_url": format!("{}/signed/{}", mock.base_url, name),
        "file_url": format!("{}/cdn/{}", mock.base_url, name),
    })))
}

async fn receive_upload(State(mock): Shared, Path(name): Path<String>, body: Bytes) -> StatusCode {
    mock.files.lock().unwrap().insert(name, body.to_vec());
    StatusCode::OK
}

async fn serve_file(State(mock): Shared, Path(name): Path<String>) -> Result<Vec<u8>, StatusCode> {
    mock.files
        .lock()
        .unwrap()
        .get(&name)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn submit(
    State(mock): Shared,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    mock.submitted.lock().unwrap().push(body);
    Ok(Json(json!({ "request_id": "req-42", "status": "IN_QUEUE" })))
}

async fn status(
    State(mock): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    if id != "req-42" {
        return Err(StatusCode::NOT_FOUND);
    }
    let poll = mock.status_polls.fetch_add(1, Ordering::SeqCst);
    Ok(Json(match poll {
        0 => json!({ "status": "IN_QUEUE", "queue_position": 1 }),
        1 => json!({ "status": "IN_PROGRESS", "logs": [] }),
        _ => match &mock.behaviour.job_error {
            Some(error) => json!({ "status": "COMPLETED", "error": error }),
            None => json!({ "status": "COMPLETED" }),
        },
    }))
}

async fn result(
    State(mock): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    if id != "req-42" {
        return Err(StatusCode::NOT_FOUND);
    }
    if mock.behaviour.no_images {
        return Ok(Json(json!({ "images": [], "description": "" })));
    }
    Ok(Json(json!({
        "images": [{
            "url": format!("{}/cdn/result.png", mock.base_url),
            "content_type": "image/png",
            "file_name": "result.png",
            "width": 16,
            "height": 16
        }],
        "description": "A blue sky"
    })))
}

/// Start the mock on an ephemeral port; `result.png` is pre-seeded
async fn spawn_mock(behaviour: Behaviour) -> Arc<MockFal> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let mock = Arc::new(MockFal {
        base_url,
        behaviour,
        ..MockFal::default()
    });
    mock.files.lock().unwrap().insert(
        "result.png".to_string(),
        encode(&solid(16, 16, [40, 120, 250, 255]), ImageFormat::Png),
    );

    let app = Router::new()
        .route("/storage/upload/initiate", post(initiate))
        .route("/signed/:name", put(receive_upload))
        .route("/cdn/:name", get(serve_file))
        .route(&format!("/{}/edit", APP), post(submit))
        .route(&format!("/{}/requests/:id/status", APP), get(status))
        .route(&format!("/{}/requests/:id", APP), get(result))
        .with_state(Arc::clone(&mock));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    mock
}

fn config(mock: &MockFal, api_key: &str) -> ServiceConfig {
    ServiceConfig::builder()
        .api_key(api_key)
        .queue_base_url(mock.base_url.clone())
        .storage_base_url(mock.base_url.clone())
        .poll_interval(Duration::from_millis(5))
        .request_timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

fn composite(dir: &TempDir) -> (std::path::PathBuf, Vec<u8>) {
    let path = dir.path().join("combined.png");
    let bytes = encode(&solid(16, 16, [255, 0, 0, 255]), ImageFormat::Png);
    std::fs::write(&path, &bytes).unwrap();
    (path, bytes)
}

#[tokio::test]
async fn test_full_cycle_against_mock() {
    let mock = spawn_mock(Behaviour::default()).await;
    let dir = TempDir::new().unwrap();
    let (path, original) = composite(&dir);

    let recontextualizer = Recontextualizer::from_config(&config(&mock, API_KEY)).unwrap();
    recontextualizer
        .recontextualize(&path, Some("add a blue sky"))
        .await
        .unwrap();

    // Composite replaced by the served result
    let expected = mock.files.lock().unwrap()["result.png"].clone();
    assert_eq!(std::fs::read(&path).unwrap(), expected);

    // Upload: initiate body, then the raw bytes on the signed URL
    let initiated = mock.initiated.lock().unwrap().clone();
    assert_eq!(initiated.len(), 1);
    assert_eq!(initiated[0]["content_type"], "image/png");
    assert_eq!(initiated[0]["file_name"], "combined.png");
    assert_eq!(mock.files.lock().unwrap()["combined.png"], original);

    // Submit body
    let submitted = mock.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0]["prompt"],
        "\"add a blue sky. Do not add the outline in the final image.\""
    );
    assert_eq!(
        submitted[0]["image_urls"][0],
        format!("{}/cdn/combined.png", mock.base_url)
    );
    assert_eq!(submitted[0]["resolution"], "4K");
    assert_eq!(submitted[0]["aspect_ratio"], "auto");

    // Queued, in progress, completed
    assert_eq!(mock.status_polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_job_reports_reason() {
    let mock = spawn_mock(Behaviour {
        job_error: Some("Image could not be processed".to_string()),
        ..Behaviour::default()
    })
    .await;
    let dir = TempDir::new().unwrap();
    let (path, original) = composite(&dir);

    let err = Recontextualizer::from_config(&config(&mock, API_KEY))
        .unwrap()
        .recontextualize(&path, Some("x"))
        .await
        .unwrap_err();

    match err {
        RecontextError::JobFailed { request_id, reason } => {
            assert_eq!(request_id, "req-42");
            assert!(reason.contains("could not be processed"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[tokio::test]
async fn test_empty_images_is_no_results() {
    let mock = spawn_mock(Behaviour {
        no_images: true,
        ..Behaviour::default()
    })
    .await;
    let dir = TempDir::new().unwrap();
    let (path, original) = composite(&dir);

    let err = Recontextualizer::from_config(&config(&mock, API_KEY))
        .unwrap()
        .recontextualize(&path, Some("x"))
        .await
        .unwrap_err();

    assert!(matches!(err, RecontextError::NoResults));
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[tokio::test]
async fn test_rejected_key_is_upload_failure() {
    let mock = spawn_mock(Behaviour::default()).await;
    let dir = TempDir::new().unwrap();
    let (path, _) = composite(&dir);

    let client = FalClient::new(&config(&mock, "wrong-key")).unwrap();
    let err = client.upload(&path).await.unwrap_err();

    assert!(matches!(err, RecontextError::UploadFailure(ref msg) if msg.contains("401")));
    assert!(mock.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_polling_until_completed() {
    let mock = spawn_mock(Behaviour::default()).await;
    let client = FalClient::new(&config(&mock, API_KEY)).unwrap();

    let job = EditJob {
        model_id: format!("{}/edit", APP),
        request_id: "req-42".to_string(),
    };
    let result = client.wait_for_result(&job).await.unwrap();

    assert_eq!(result.images.len(), 1);
    assert_eq!(result.images[0].width, Some(16));
    assert_eq!(result.description.as_deref(), Some("A blue sky"));
    assert_eq!(mock.status_polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_download_missing_file_is_download_failure() {
    let mock = spawn_mock(Behaviour::default()).await;
    let client = FalClient::new(&config(&mock, API_KEY)).unwrap();

    let err = client
        .download(&format!("{}/cdn/missing.png", mock.base_url))
        .await
        .unwrap_err();

    assert!(matches!(err, RecontextError::DownloadFailure(ref msg) if msg.contains("404")));
}
