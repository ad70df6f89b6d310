//! fal.ai queue and storage client
//!
//! Upload goes through the two-step storage flow (initiate, then `PUT` the
//! bytes to the returned signed URL). Jobs are submitted to the queue and
//! polled on the status endpoint until they complete.

use super::{EditJob, EditRequest, EditResult, EditService, JobStatus};
use crate::config::ServiceConfig;
use crate::error::{RecontextError, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

/// Storage backend requested when initiating an upload
const STORAGE_TYPE: &str = "fal-cdn-v3";

#[derive(Debug, Serialize)]
struct InitiateUpload<'a> {
    content_type: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct InitiateUploadResponse {
    upload_url: String,
    file_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_id: String,
}

/// HTTP client for the fal queue API
#[derive(Debug, Clone)]
pub struct FalClient {
    client: Client,
    api_key: String,
    queue_base_url: String,
    storage_base_url: String,
    poll_interval: Duration,
}

impl FalClient {
    /// Create a new client from a validated configuration
    ///
    /// # Errors
    /// - Invalid service configuration
    /// - Failed to create HTTP client
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                RecontextError::invalid_config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            queue_base_url: config.queue_base_url.trim_end_matches('/').to_string(),
            storage_base_url: config.storage_base_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval,
        })
    }

    fn authorization(&self) -> String {
        format!("Key {}", self.api_key)
    }

    /// Queue path of the application owning `model_id`
    ///
    /// Status and result endpoints are addressed by `owner/app` only, so any
    /// sub-path such as `/edit` is dropped.
    #[must_use]
    pub fn queue_app_path(model_id: &str) -> String {
        model_id
            .trim_matches('/')
            .split('/')
            .take(2)
            .collect::<Vec<_>>()
            .join("/")
    }

    fn status_url(&self, job: &EditJob) -> String {
        format!(
            "{}/{}/requests/{}/status",
            self.queue_base_url,
            Self::queue_app_path(&job.model_id),
            job.request_id
        )
    }

    fn result_url(&self, job: &EditJob) -> String {
        format!(
            "{}/{}/requests/{}",
            self.queue_base_url,
            Self::queue_app_path(&job.model_id),
            job.request_id
        )
    }

    async fn fetch_status(&self, job: &EditJob) -> Result<JobStatus> {
        let url = self.status_url(job);
        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| {
                RecontextError::job_failed(
                    &job.request_id,
                    RecontextError::network_context("status request failed", &url, &e),
                )
            })?;

        let response = ensure_success(response)
            .await
            .map_err(|reason| RecontextError::job_failed(&job.request_id, reason))?;

        response.json::<JobStatus>().await.map_err(|e| {
            RecontextError::job_failed(&job.request_id, format!("unreadable status payload: {}", e))
        })
    }
}

/// Turn a non-2xx response into a message carrying status and body
async fn ensure_success(response: Response) -> std::result::Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    Err(if body.is_empty() {
        format!("HTTP {} for {}", status, url)
    } else {
        format!("HTTP {} for {}: {}", status, url, body)
    })
}

fn content_type_for(path: &Path) -> &'static str {
    image::ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[async_trait]
impl EditService for FalClient {
    async fn upload(&self, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.png");
        let content_type = content_type_for(path);

        let initiate_url = format!(
            "{}/storage/upload/initiate?storage_type={}",
            self.storage_base_url, STORAGE_TYPE
        );
        let response = self
            .client
            .post(&initiate_url)
            .header(header::AUTHORIZATION, self.authorization())
            .json(&InitiateUpload {
                content_type,
                file_name,
            })
            .send()
            .await
            .map_err(|e| {
                RecontextError::upload(RecontextError::network_context(
                    "initiate upload",
                    &initiate_url,
                    &e,
                ))
            })?;
        let initiated: InitiateUploadResponse = ensure_success(response)
            .await
            .map_err(RecontextError::upload)?
            .json()
            .await
            .map_err(|e| RecontextError::upload(format!("unreadable initiate response: {}", e)))?;

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| RecontextError::upload(format!("open {}: {}", path.display(), e)))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| RecontextError::upload(format!("stat {}: {}", path.display(), e)))?
            .len();
        trace!(bytes = length, content_type, "Streaming upload body");

        let response = self
            .client
            .put(&initiated.upload_url)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| {
                RecontextError::upload(RecontextError::network_context(
                    "upload bytes",
                    &initiated.upload_url,
                    &e,
                ))
            })?;
        ensure_success(response).await.map_err(RecontextError::upload)?;

        Ok(initiated.file_url)
    }

    async fn submit(&self, model_id: &str, request: &EditRequest) -> Result<EditJob> {
        let url = format!("{}/{}", self.queue_base_url, model_id.trim_matches('/'));
        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, self.authorization())
            .json(request)
            .send()
            .await
            .map_err(|e| RecontextError::submit(RecontextError::network_context("submit", &url, &e)))?;

        let submitted: SubmitResponse = ensure_success(response)
            .await
            .map_err(RecontextError::submit)?
            .json()
            .await
            .map_err(|e| RecontextError::submit(format!("unreadable submit response: {}", e)))?;

        Ok(EditJob {
            model_id: model_id.to_string(),
            request_id: submitted.request_id,
        })
    }

    async fn wait_for_result(&self, job: &EditJob) -> Result<EditResult> {
        loop {
            let status = self.fetch_status(job).await?;
            match &status {
                JobStatus::InQueue { queue_position } => {
                    debug!(queue_position = ?queue_position, "Edit job queued");
                },
                JobStatus::InProgress {} => debug!("Edit job in progress"),
                JobStatus::Completed { .. } => {
                    if let Some(reason) = status.failure() {
                        return Err(RecontextError::job_failed(&job.request_id, reason));
                    }
                    break;
                },
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let url = self.result_url(job);
        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| {
                RecontextError::job_failed(
                    &job.request_id,
                    RecontextError::network_context("result request failed", &url, &e),
                )
            })?;

        ensure_success(response)
            .await
            .map_err(|reason| RecontextError::job_failed(&job.request_id, reason))?
            .json::<EditResult>()
            .await
            .map_err(|e| {
                RecontextError::job_failed(&job.request_id, format!("unreadable result payload: {}", e))
            })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RecontextError::download(RecontextError::network_context("fetch result", url, &e)))?;

        let bytes = ensure_success(response)
            .await
            .map_err(RecontextError::download)?
            .bytes()
            .await
            .map_err(|e| RecontextError::download(format!("read body of {}: {}", url, e)))?;

        debug!(bytes = bytes.len(), "Downloaded result image");
        Ok(bytes.to_vec())
    }
}
