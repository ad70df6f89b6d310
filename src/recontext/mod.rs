//! Recontextualization through a remote generative edit service
//!
//! A composite is uploaded, an edit job is submitted with a templated prompt,
//! the job is awaited until it reaches a terminal state, and the first output
//! image replaces the composite on disk. The overwrite is the only mutation:
//! any failure before it leaves the composite byte-for-byte unchanged.

mod fal;

pub use fal::FalClient;

use crate::config::{AspectRatio, Resolution, ServiceConfig};
use crate::error::{RecontextError, Result};
use crate::prompt::PromptTemplate;
use crate::tracing_config::spans;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Arguments of an edit job, serialized as the submit body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditRequest {
    pub prompt: String,
    pub image_urls: Vec<String>,
    pub resolution: Resolution,
    pub aspect_ratio: AspectRatio,
}

/// Handle to a submitted edit job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditJob {
    pub model_id: String,
    pub request_id: String,
}

/// Queue state of an edit job as reported by the status endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InQueue {
        #[serde(default)]
        queue_position: Option<u64>,
    },
    InProgress {},
    Completed {
        #[serde(default)]
        error: Option<serde_json::Value>,
    },
}

impl JobStatus {
    /// Whether no further transition can happen
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Failure reason of a completed job, if it failed
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        match self {
            Self::Completed { error: Some(err) } if !err.is_null() => Some(match err {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }
}

/// One image produced by an edit job
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Terminal payload of a successful edit job
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct EditResult {
    #[serde(default)]
    pub images: Vec<OutputImage>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Remote generative edit service
#[async_trait]
pub trait EditService: Send + Sync {
    /// Upload a local file and return a publicly fetchable URL
    async fn upload(&self, path: &Path) -> Result<String>;

    /// Create an edit job without waiting for it
    async fn submit(&self, model_id: &str, request: &EditRequest) -> Result<EditJob>;

    /// Wait until the job is terminal and return its result payload
    ///
    /// May take an arbitrary, externally controlled amount of time.
    async fn wait_for_result(&self, job: &EditJob) -> Result<EditResult>;

    /// Fetch the bytes behind a result URL
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Edit job parameters applied to every submission
#[derive(Debug, Clone, PartialEq)]
pub struct EditSettings {
    pub model_id: String,
    pub resolution: Resolution,
    pub aspect_ratio: AspectRatio,
    pub prompt_template: PromptTemplate,
}

impl Default for EditSettings {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for EditSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            resolution: config.resolution,
            aspect_ratio: config.aspect_ratio,
            prompt_template: config.prompt_template.clone(),
        }
    }
}

/// Replaces a composite with the edit service's output
#[derive(Clone)]
pub struct Recontextualizer {
    service: Arc<dyn EditService>,
    settings: EditSettings,
}

impl Recontextualizer {
    pub fn new(service: Arc<dyn EditService>, settings: EditSettings) -> Self {
        Self { service, settings }
    }

    /// Build a recontextualizer backed by the fal queue API
    ///
    /// # Errors
    /// - Invalid service configuration
    /// - Failed to create HTTP client
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let client = FalClient::new(config)?;
        Ok(Self::new(Arc::new(client), EditSettings::from(config)))
    }

    #[must_use]
    pub fn settings(&self) -> &EditSettings {
        &self.settings
    }

    /// Run upload, submit, await, download and overwrite for `image_path`
    ///
    /// Returns `image_path` on success, now holding the edited image.
    ///
    /// # Errors
    /// - [`RecontextError::UploadFailure`] if the composite could not be uploaded
    /// - [`RecontextError::SubmitFailure`] if the job could not be created
    /// - [`RecontextError::JobFailed`] if the job ended in failure
    /// - [`RecontextError::NoResults`] if the job produced no images
    /// - [`RecontextError::DownloadFailure`] if the result could not be fetched
    /// - [`RecontextError::Io`] if the overwrite itself failed
    pub async fn recontextualize(&self, image_path: &Path, prompt: Option<&str>) -> Result<PathBuf> {
        let span = spans::recontextualize(image_path, &self.settings.model_id);
        self.run(image_path, prompt).instrument(span).await
    }

    async fn run(&self, image_path: &Path, prompt: Option<&str>) -> Result<PathBuf> {
        info!("Uploading composite to edit service");
        let image_url = self
            .service
            .upload(image_path)
            .instrument(spans::upload(image_path))
            .await
            .map_err(|e| into_stage_error(e, RecontextError::UploadFailure))?;
        debug!(image_url = %image_url, "Composite uploaded");

        let request = EditRequest {
            prompt: self.settings.prompt_template.render(prompt),
            image_urls: vec![image_url],
            resolution: self.settings.resolution,
            aspect_ratio: self.settings.aspect_ratio,
        };
        debug!(prompt = %request.prompt, "Submitting edit job");

        let job = self
            .service
            .submit(&self.settings.model_id, &request)
            .instrument(spans::submit(&self.settings.model_id))
            .await
            .map_err(|e| into_stage_error(e, RecontextError::SubmitFailure))?;
        info!(request_id = %job.request_id, "Edit job submitted");

        let result = self
            .service
            .wait_for_result(&job)
            .instrument(spans::await_job(&job.model_id, &job.request_id))
            .await?;
        if let Some(description) = &result.description {
            debug!(description = %description, "Edit job description");
        }

        let first = result.images.first().ok_or_else(|| {
            warn!(request_id = %job.request_id, "Edit job returned no images");
            RecontextError::NoResults
        })?;

        let bytes = self
            .service
            .download(&first.url)
            .instrument(spans::download(&first.url, image_path))
            .await
            .map_err(|e| into_stage_error(e, RecontextError::DownloadFailure))?;

        if image::guess_format(&bytes).is_err() {
            return Err(RecontextError::download(format!(
                "result at {} is not a recognizable image ({} bytes)",
                first.url,
                bytes.len()
            )));
        }

        overwrite(image_path, bytes).await?;
        info!(path = %image_path.display(), "Composite replaced with edited image");

        Ok(image_path.to_path_buf())
    }
}

/// Keep errors already attributed to a stage; wrap anything else in that stage's variant
fn into_stage_error(error: RecontextError, wrap: fn(String) -> RecontextError) -> RecontextError {
    let stage_probe = wrap(String::new());
    if std::mem::discriminant(&error) == std::mem::discriminant(&stage_probe) {
        error
    } else {
        wrap(error.to_string())
    }
}

/// Replace `path` with `bytes` through a temp file in the same directory
async fn overwrite(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| RecontextError::file_io_error("create temp file in", dir, &e))?;
        temp.write_all(&bytes)
            .and_then(|()| temp.flush())
            .map_err(|e| RecontextError::file_io_error("write edited image to", temp.path(), &e))?;
        temp.persist(&target)
            .map_err(|e| RecontextError::file_io_error("replace", &target, &e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| RecontextError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
