//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::{
    config::{AspectRatio, Resolution, ServerConfig, ServiceConfig},
    prompt::PromptTemplate,
};
use anyhow::{Context, Result};
use std::time::Duration;

/// Convert CLI arguments to server and service configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build `ServiceConfig` from CLI arguments
    pub(crate) fn service_config(cli: &Cli) -> Result<ServiceConfig> {
        let resolution: Resolution = cli.resolution.parse().context("Invalid --resolution")?;
        let aspect_ratio: AspectRatio = cli.aspect_ratio.parse().context("Invalid --aspect-ratio")?;

        let template = PromptTemplate::new(cli.prompt_suffix.clone(), !cli.no_prompt_quotes);

        let mut builder = ServiceConfig::builder()
            .api_key(cli.fal_key.clone().unwrap_or_default())
            .model_id(cli.model.clone())
            .resolution(resolution)
            .aspect_ratio(aspect_ratio)
            .prompt_template(template)
            .poll_interval(Duration::from_millis(cli.poll_interval_ms))
            .request_timeout(Duration::from_secs(cli.request_timeout_secs));

        if let Some(url) = &cli.queue_url {
            builder = builder.queue_base_url(url.clone());
        }
        if let Some(url) = &cli.storage_url {
            builder = builder.storage_base_url(url.clone());
        }

        builder.build().context("Invalid edit service configuration")
    }

    /// Build `ServerConfig` from CLI arguments
    pub(crate) fn server_config(cli: &Cli) -> Result<ServerConfig> {
        ServerConfig::builder()
            .bind_addr(cli.bind)
            .uploads_dir(cli.uploads_dir.clone())
            .index_html(cli.index_html.clone())
            .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
            .retention(Duration::from_secs(cli.retention_secs))
            .sweep_interval(Duration::from_secs(cli.sweep_interval_secs))
            .build()
            .context("Invalid server configuration")
    }
}
