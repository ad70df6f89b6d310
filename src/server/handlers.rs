//! Route handlers

use super::AppState;
use crate::error::RecontextError;
use crate::pipeline::{ProcessRequest, Upload};
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

const BUILTIN_INDEX: &str = include_str!("../../static/index.html");

/// Body of a successful `/process` call
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub processed_image_url: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned by handlers, rendered as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RecontextError> for ApiError {
    fn from(err: RecontextError) -> Self {
        let status = if matches!(err, RecontextError::PayloadTooLarge(_)) {
            StatusCode::PAYLOAD_TOO_LARGE
        } else if matches!(err, RecontextError::InvalidUpload(_)) {
            StatusCode::BAD_REQUEST
        } else if err.is_client_input() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else if err.is_upstream() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            error!(error = %err, status = status.as_u16(), "Request failed");
        } else {
            warn!(error = %err, status = status.as_u16(), "Request rejected");
        }

        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// `POST /process`
pub async fn process(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    let request = read_process_form(multipart).await?;

    // Own task so a dropped connection does not cancel the remote job
    let pipeline = state.pipeline.clone();
    let outcome = tokio::spawn(async move { pipeline.process(request).await })
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("processing task failed: {}", e),
            )
        })??;

    debug!(
        request_id = %outcome.request_id,
        composite_ms = outcome.timings.composite_ms,
        recontext_ms = outcome.timings.recontext_ms,
        "Responding with processed image"
    );

    Ok(Json(ProcessResponse {
        processed_image_url: outcome.public_url,
    }))
}

async fn read_process_form(mut multipart: Multipart) -> Result<ProcessRequest, RecontextError> {
    let mut image = None;
    let mut mask = None;
    let mut prompt = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("malformed multipart body", &e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "mask" => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(&format!("failed to read `{}`", name), &e))?;
                let upload = Upload::new(file_name, bytes.to_vec());
                if name == "image" {
                    image = Some(upload);
                } else {
                    mask = Some(upload);
                }
            },
            "prompt" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error("failed to read `prompt`", &e))?;
                prompt = Some(text);
            },
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    Ok(ProcessRequest {
        image: image.ok_or_else(|| RecontextError::invalid_upload("missing required field `image`"))?,
        mask: mask.ok_or_else(|| RecontextError::invalid_upload("missing required field `mask`"))?,
        prompt,
    })
}

/// Body-limit rejections keep their 413; everything else is a bad form
fn multipart_error(context: &str, err: &MultipartError) -> RecontextError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RecontextError::payload_too_large(format!("{}: {}", context, err.body_text()))
    } else {
        RecontextError::invalid_upload(format!("{}: {}", context, err))
    }
}

/// `GET /`
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    if let Some(path) = &state.index_html {
        match tokio::fs::read_to_string(path).await {
            Ok(page) => return Html(page),
            Err(e) => warn!(path = %path.display(), error = %e, "Falling back to built-in landing page"),
        }
    }
    Html(BUILTIN_INDEX.to_string())
}

/// `GET /favicon.ico`
pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `GET /uploads/*path`, confined to the upload directory
pub async fn serve_upload(
    State(state): State<Arc<AppState>>,
    Path(requested): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::new(StatusCode::NOT_FOUND, "file not found");

    let Some(path) = state.pipeline.store().resolve(&requested) else {
        debug!(requested = %requested, "Rejected upload lookup");
        return Err(not_found());
    };

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            not_found()
        } else {
            ApiError::from(RecontextError::file_io_error("read", &path, &e))
        }
    })?;

    let content_type = image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
