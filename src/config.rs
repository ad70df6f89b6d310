//! Configuration types for the edit service client and the HTTP server

use crate::error::{RecontextError, Result};
use crate::prompt::PromptTemplate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default edit model on the fal queue
pub const DEFAULT_MODEL_ID: &str = "fal-ai/nano-banana-pro/edit";

/// Default fal queue endpoint
pub const DEFAULT_QUEUE_BASE_URL: &str = "https://queue.fal.run";

/// Default fal storage REST endpoint
pub const DEFAULT_STORAGE_BASE_URL: &str = "https://rest.alpha.fal.ai";

/// Requested output resolution for the edit job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[default]
    #[serde(rename = "4K")]
    FourK,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneK => write!(f, "1K"),
            Self::TwoK => write!(f, "2K"),
            Self::FourK => write!(f, "4K"),
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = RecontextError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "1K" => Ok(Self::OneK),
            "2K" => Ok(Self::TwoK),
            "4K" => Ok(Self::FourK),
            other => Err(RecontextError::config_value_error(
                "resolution",
                other.to_string(),
                "1K, 2K, 4K",
                Some("4K".to_string()),
            )),
        }
    }
}

/// Aspect-ratio policy for the edit job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    /// Preserve the source aspect ratio
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "21:9")]
    Ultrawide,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "9:16")]
    Portrait9x16,
}

impl AspectRatio {
    const ALL: [(Self, &'static str); 11] = [
        (Self::Auto, "auto"),
        (Self::Ultrawide, "21:9"),
        (Self::Landscape16x9, "16:9"),
        (Self::Landscape3x2, "3:2"),
        (Self::Landscape4x3, "4:3"),
        (Self::Landscape5x4, "5:4"),
        (Self::Square, "1:1"),
        (Self::Portrait4x5, "4:5"),
        (Self::Portrait3x4, "3:4"),
        (Self::Portrait2x3, "2:3"),
        (Self::Portrait9x16, "9:16"),
    ];

    /// Wire value sent to the edit service
    #[must_use]
    pub fn as_str(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(ratio, _)| *ratio == self)
            .map_or("auto", |(_, name)| *name)
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = RecontextError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(ratio, _)| *ratio)
            .ok_or_else(|| {
                RecontextError::config_value_error(
                    "aspect ratio",
                    s.to_string(),
                    "auto, 21:9, 16:9, 3:2, 4:3, 5:4, 1:1, 4:5, 3:4, 2:3, 9:16",
                    Some("auto".to_string()),
                )
            })
    }
}

/// Configuration for the generative edit service client
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// API key sent as `Authorization: Key <api_key>`
    #[serde(skip_serializing, default)]
    pub api_key: String,

    /// Base URL of the job queue
    pub queue_base_url: String,

    /// Base URL of the object-storage REST API
    pub storage_base_url: String,

    /// Model identifier the edit job is submitted to
    pub model_id: String,

    /// Requested output resolution
    pub resolution: Resolution,

    /// Aspect-ratio policy
    pub aspect_ratio: AspectRatio,

    /// Prompt wrapping applied before submission
    pub prompt_template: PromptTemplate,

    /// Delay between job status polls
    pub poll_interval: Duration,

    /// Timeout for each individual HTTP call (not for the whole await)
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("queue_base_url", &self.queue_base_url)
            .field("storage_base_url", &self.storage_base_url)
            .field("model_id", &self.model_id)
            .field("resolution", &self.resolution)
            .field("aspect_ratio", &self.aspect_ratio)
            .field("prompt_template", &self.prompt_template)
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            queue_base_url: DEFAULT_QUEUE_BASE_URL.to_string(),
            storage_base_url: DEFAULT_STORAGE_BASE_URL.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            resolution: Resolution::default(),
            aspect_ratio: AspectRatio::default(),
            prompt_template: PromptTemplate::default(),
            poll_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(300), // 5 minute timeout per call
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use mask_recontext::{ServiceConfig, Resolution};
    ///
    /// let config = ServiceConfig::builder()
    ///     .api_key("key-id:key-secret")
    ///     .resolution(Resolution::TwoK)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.model_id, "fal-ai/nano-banana-pro/edit");
    /// ```
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Empty API key or model identifier
    /// - Base URLs that are not http(s)
    /// - Zero poll interval or request timeout
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(RecontextError::invalid_config(
                "API key is required (set FAL_KEY or pass --fal-key)",
            ));
        }

        if self.model_id.trim().is_empty() {
            return Err(RecontextError::invalid_config("Model identifier cannot be empty"));
        }

        for (name, url) in [
            ("queue base URL", &self.queue_base_url),
            ("storage base URL", &self.storage_base_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(RecontextError::invalid_config(format!(
                    "Unsupported {}: {}. Expected an http(s) URL",
                    name, url
                )));
            }
        }

        let poll_ms = self.poll_interval.as_millis();
        if poll_ms == 0 || poll_ms > 60_000 {
            return Err(RecontextError::config_value_error(
                "poll interval (ms)",
                poll_ms,
                "1-60000",
                Some(500),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(RecontextError::config_value_error(
                "request timeout (s)",
                0,
                "1 or more",
                Some(300),
            ));
        }

        Ok(())
    }
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.api_key = key.into();
        self
    }

    #[must_use]
    pub fn queue_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.queue_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn storage_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.storage_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn model_id<S: Into<String>>(mut self, model_id: S) -> Self {
        self.config.model_id = model_id.into().trim_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.config.resolution = resolution;
        self
    }

    #[must_use]
    pub fn aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.config.aspect_ratio = aspect_ratio;
        self
    }

    #[must_use]
    pub fn prompt_template(mut self, template: PromptTemplate) -> Self {
        self.config.prompt_template = template;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// See [`ServiceConfig::validate`].
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration for the HTTP server and its upload directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: SocketAddr,

    /// Root directory for uploaded and produced images
    pub uploads_dir: PathBuf,

    /// Landing page served on `GET /` (built-in page when unset)
    pub index_html: Option<PathBuf>,

    /// Maximum accepted request body in bytes
    pub max_upload_bytes: usize,

    /// How long produced images stay available for download
    pub retention: Duration,

    /// How often expired files are swept from the upload directory
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            uploads_dir: PathBuf::from("uploads"),
            index_html: None,
            max_upload_bytes: 32 * 1024 * 1024,
            retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Validate server parameters
    ///
    /// # Errors
    /// - Zero body limit
    /// - Zero retention window or sweep interval
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(RecontextError::config_value_error(
                "max upload size (bytes)",
                0,
                "1 or more",
                Some(32 * 1024 * 1024),
            ));
        }

        if self.retention.is_zero() {
            return Err(RecontextError::config_value_error(
                "retention (s)",
                0,
                "1 or more",
                Some(3600),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(RecontextError::config_value_error(
                "sweep interval (s)",
                0,
                "1 or more",
                Some(300),
            ));
        }

        if self.uploads_dir.as_os_str().is_empty() {
            return Err(RecontextError::invalid_config("Upload directory cannot be empty"));
        }

        Ok(())
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn uploads_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.uploads_dir = dir.into();
        self
    }

    #[must_use]
    pub fn index_html(mut self, path: Option<PathBuf>) -> Self {
        self.config.index_html = path;
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// See [`ServerConfig::validate`].
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.resolution, Resolution::FourK);
        assert_eq!(config.aspect_ratio, AspectRatio::Auto);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        // No key by default, so the default config is not usable as-is
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_validates() {
        let config = ServiceConfig::builder()
            .api_key("abc")
            .queue_base_url("http://127.0.0.1:9000/")
            .model_id("/fal-ai/flux/dev/")
            .build()
            .unwrap();
        assert_eq!(config.queue_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.model_id, "fal-ai/flux/dev");

        let err = ServiceConfig::builder().build().unwrap_err();
        assert!(err.to_string().contains("API key"));

        let err = ServiceConfig::builder()
            .api_key("abc")
            .storage_base_url("ftp://files")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("storage base URL"));

        let err = ServiceConfig::builder()
            .api_key("abc")
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("1-60000"));
    }

    #[test]
    fn test_api_key_is_redacted() {
        let config = ServiceConfig::builder().api_key("super-secret").build().unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("4k".parse::<Resolution>().unwrap(), Resolution::FourK);
        assert_eq!("1K".parse::<Resolution>().unwrap(), Resolution::OneK);
        assert!("8K".parse::<Resolution>().is_err());
        assert_eq!(
            serde_json::to_string(&Resolution::TwoK).unwrap(),
            "\"2K\""
        );
    }

    #[test]
    fn test_aspect_ratio_parsing() {
        assert_eq!("auto".parse::<AspectRatio>().unwrap(), AspectRatio::Auto);
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Landscape16x9);
        assert!("7:5".parse::<AspectRatio>().is_err());
        assert_eq!(AspectRatio::Portrait9x16.to_string(), "9:16");
        assert_eq!(
            serde_json::to_string(&AspectRatio::Auto).unwrap(),
            "\"auto\""
        );
    }

    #[test]
    fn test_server_config_validation() {
        assert!(ServerConfig::default().validate().is_ok());

        let err = ServerConfig::builder().max_upload_bytes(0).build().unwrap_err();
        assert!(err.to_string().contains("max upload size"));

        let err = ServerConfig::builder()
            .retention(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("retention"));
    }
}
