//! Error types for compositing and recontextualization

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for recontextualization operations
pub type Result<T> = std::result::Result<T, RecontextError>;

/// Comprehensive error types for the compositing and recontextualization pipeline
#[derive(Error, Debug)]
pub enum RecontextError {
    /// Input/output errors (permission denied, disk full, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Base and mask images do not share the same pixel dimensions
    #[error(
        "Dimension mismatch: base image is {}x{} but mask is {}x{}",
        base.0, base.1, mask.0, mask.1
    )]
    DimensionMismatch { base: (u32, u32), mask: (u32, u32) },

    /// A compositing input does not exist
    #[error("Input file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Decode or encode failure while compositing
    #[error("Composite failed during {stage}: {source}")]
    CompositeFailure {
        stage: &'static str,
        #[source]
        source: image::ImageError,
    },

    /// The composite could not be sent to the edit service
    #[error("Upload failed: {0}")]
    UploadFailure(String),

    /// The edit job could not be created
    #[error("Submit failed: {0}")]
    SubmitFailure(String),

    /// The edit job reached a failed terminal state
    #[error("Edit job {request_id} failed: {reason}")]
    JobFailed { request_id: String, reason: String },

    /// The edit job completed without any output image
    #[error("No results: service returned no images")]
    NoResults,

    /// The result image could not be fetched
    #[error("Download failed: {0}")]
    DownloadFailure(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed inbound request (missing form field, bad multipart body)
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// Request body exceeds the configured upload limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
}

impl RecontextError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid upload error
    pub fn invalid_upload<S: Into<String>>(msg: S) -> Self {
        Self::InvalidUpload(msg.into())
    }

    /// Create a new payload-too-large error
    pub fn payload_too_large<S: Into<String>>(msg: S) -> Self {
        Self::PayloadTooLarge(msg.into())
    }

    /// Create a new upload failure
    pub fn upload<S: Into<String>>(msg: S) -> Self {
        Self::UploadFailure(msg.into())
    }

    /// Create a new submit failure
    pub fn submit<S: Into<String>>(msg: S) -> Self {
        Self::SubmitFailure(msg.into())
    }

    /// Create a new download failure
    pub fn download<S: Into<String>>(msg: S) -> Self {
        Self::DownloadFailure(msg.into())
    }

    /// Create a failed-job error for the given request
    pub fn job_failed<S: Into<String>, R: Into<String>>(request_id: S, reason: R) -> Self {
        Self::JobFailed {
            request_id: request_id.into(),
            reason: reason.into(),
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: &std::io::Error) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Describe a transport error from the edit service with the endpoint involved
    pub fn network_context(operation: &str, url: &str, error: &dyn std::fmt::Display) -> String {
        format!("{} ({}): {}", operation, url, error)
    }

    /// Whether the failure originated in the remote edit service
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UploadFailure(_)
                | Self::SubmitFailure(_)
                | Self::JobFailed { .. }
                | Self::NoResults
                | Self::DownloadFailure(_)
        )
    }

    /// Whether the failure was caused by unusable client input
    #[must_use]
    pub fn is_client_input(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::CompositeFailure {
                    stage: "decode",
                    ..
                }
                | Self::InvalidUpload(_)
                | Self::PayloadTooLarge(_)
        )
    }
}
