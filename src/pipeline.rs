//! Per-request processing pipeline
//!
//! Inbound files are persisted to the upload store, composited, and handed
//! to the recontextualizer. A compositing failure stops the request before
//! any call to the edit service is made.

use crate::compositor;
use crate::error::{RecontextError, Result};
use crate::recontext::Recontextualizer;
use crate::storage::UploadStore;
use crate::tracing_config::{events, spans};
use instant::Instant;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Instrument};
use uuid::Uuid;

/// One uploaded file of a request
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// File name as sent by the client, used only for its extension
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new<S: Into<String>>(file_name: Option<S>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.map(Into::into),
            bytes,
        }
    }
}

/// Inputs of one `/process` call
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub image: Upload,
    pub mask: Upload,
    pub prompt: Option<String>,
}

/// Stage durations of one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineTimings {
    pub composite_ms: u64,
    pub recontext_ms: u64,
    pub total_ms: u64,
}

/// Result of a successful request
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub request_id: String,
    pub output_path: PathBuf,
    pub public_url: String,
    pub timings: PipelineTimings,
}

/// Composite-then-recontextualize pipeline bound to an upload store
#[derive(Clone)]
pub struct ProcessingPipeline {
    store: Arc<UploadStore>,
    recontextualizer: Recontextualizer,
}

impl ProcessingPipeline {
    pub fn new(store: Arc<UploadStore>, recontextualizer: Recontextualizer) -> Self {
        Self {
            store,
            recontextualizer,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<UploadStore> {
        &self.store
    }

    /// Run one request end to end
    ///
    /// Input files are removed when this returns. The combined image is kept
    /// only on success.
    ///
    /// # Errors
    /// - [`RecontextError::InvalidUpload`] for empty image or mask
    /// - Any compositing error, in which case the edit service is never called
    /// - Any recontextualization error
    pub async fn process(&self, request: ProcessRequest) -> Result<ProcessOutcome> {
        let request_id = Uuid::new_v4().to_string();
        let span = spans::request(&request_id);
        self.run(request_id, request).instrument(span).await
    }

    async fn run(&self, request_id: String, request: ProcessRequest) -> Result<ProcessOutcome> {
        let start = Instant::now();

        if request.image.bytes.is_empty() {
            return Err(RecontextError::invalid_upload("image file is empty"));
        }
        if request.mask.bytes.is_empty() {
            return Err(RecontextError::invalid_upload("mask file is empty"));
        }

        let mut files = self.store.begin_request();

        let mask_path = self
            .store
            .save_upload(request.mask.file_name.as_deref(), &request.mask.bytes)
            .await?;
        files.track_input(mask_path.clone());

        let image_path = self
            .store
            .save_upload(request.image.file_name.as_deref(), &request.image.bytes)
            .await?;
        files.track_input(image_path.clone());

        let output_path = self.store.allocate_output();
        files.track_output(output_path.clone());

        let composite_start = Instant::now();
        let composite_span = spans::composite(&image_path, &mask_path);
        let (base, mask, output) = (image_path.clone(), mask_path.clone(), output_path.clone());
        tokio::task::spawn_blocking(move || {
            composite_span.in_scope(|| compositor::combine_files(&base, &mask, &output))
        })
        .await
        .map_err(|e| RecontextError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(|e| {
            events::error_with_context(&e, "compositing image and mask");
            e
        })?;
        let composite_ms = composite_start.elapsed().as_millis() as u64;
        events::performance_metric("composite", composite_ms);

        let recontext_start = Instant::now();
        self.recontextualizer
            .recontextualize(&output_path, request.prompt.as_deref())
            .await
            .map_err(|e| {
                events::error_with_context(&e, "recontextualizing composite");
                e
            })?;
        let recontext_ms = recontext_start.elapsed().as_millis() as u64;
        events::performance_metric("recontextualize", recontext_ms);

        let public_url = self.store.public_url(&output_path).ok_or_else(|| {
            RecontextError::invalid_config(format!(
                "output {} is outside the upload directory",
                output_path.display()
            ))
        })?;
        files.keep_output();

        let timings = PipelineTimings {
            composite_ms,
            recontext_ms,
            total_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            url = %public_url,
            total_ms = timings.total_ms,
            "Request processed"
        );

        Ok(ProcessOutcome {
            request_id,
            output_path,
            public_url,
            timings,
        })
    }
}
