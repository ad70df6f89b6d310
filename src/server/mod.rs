//! HTTP surface of the service
//!
//! - `POST /process` composites and recontextualizes an image/mask pair
//! - `GET /` serves the landing page
//! - `GET /uploads/*path` serves produced images from the upload directory

mod handlers;

pub use handlers::{ApiError, ProcessResponse};

use crate::config::{ServerConfig, ServiceConfig};
use crate::error::{RecontextError, Result};
use crate::pipeline::ProcessingPipeline;
use crate::recontext::Recontextualizer;
use crate::storage::{spawn_retention_sweeper, UploadStore};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Shared, read-only state handed to every handler
pub struct AppState {
    pub pipeline: ProcessingPipeline,
    pub index_html: Option<PathBuf>,
}

impl AppState {
    pub fn new(pipeline: ProcessingPipeline, index_html: Option<PathBuf>) -> Self {
        Self {
            pipeline,
            index_html,
        }
    }
}

/// Build the router
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/favicon.ico", get(handlers::favicon))
        .route("/process", post(handlers::process))
        .route("/uploads/*path", get(handlers::serve_upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(Arc::new(state))
}

/// Bind the listener and serve until Ctrl-C
///
/// # Errors
/// - Invalid configuration
/// - Upload directory cannot be created
/// - Address cannot be bound
pub async fn run(server: ServerConfig, service: ServiceConfig) -> Result<()> {
    server.validate()?;

    let store = Arc::new(UploadStore::new(&server.uploads_dir)?);
    let recontextualizer = Recontextualizer::from_config(&service)?;
    let pipeline = ProcessingPipeline::new(Arc::clone(&store), recontextualizer);

    let sweeper = spawn_retention_sweeper(Arc::clone(&store), server.retention, server.sweep_interval);

    let app = router(
        AppState::new(pipeline, server.index_html.clone()),
        server.max_upload_bytes,
    );

    let listener = tokio::net::TcpListener::bind(server.bind_addr)
        .await
        .map_err(|e| {
            RecontextError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind {}: {}", server.bind_addr, e),
            ))
        })?;

    info!(
        addr = %server.bind_addr,
        uploads = %store.root().display(),
        model_id = %service.model_id,
        "Listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    result.map_err(RecontextError::Io)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
