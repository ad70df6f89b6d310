//! Mask Recontext server CLI
//!
//! Parses arguments, installs the tracing subscriber and runs the HTTP server.

use super::config::CliConfigBuilder;
use crate::config::DEFAULT_MODEL_ID;
use crate::prompt::DEFAULT_PROMPT_SUFFIX;
use crate::tracing_config::{init_cli_tracing, TracingFormat};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

/// Composite a drawn mask over an image and recontextualize it with a generative edit model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "mask-recontext")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000", env = "MASK_RECONTEXT_BIND")]
    pub bind: SocketAddr,

    /// Directory for uploaded and produced images
    #[arg(long, default_value = "uploads", value_name = "PATH")]
    pub uploads_dir: PathBuf,

    /// HTML page served on GET / [default: built-in page]
    #[arg(long, value_name = "PATH")]
    pub index_html: Option<PathBuf>,

    /// fal API key
    #[arg(long, env = "FAL_KEY", hide_env_values = true)]
    pub fal_key: Option<String>,

    /// Edit model identifier
    #[arg(short, long, default_value = DEFAULT_MODEL_ID)]
    pub model: String,

    /// Output resolution (1K, 2K, 4K)
    #[arg(long, default_value = "4K")]
    pub resolution: String,

    /// Aspect ratio ("auto" keeps the source ratio)
    #[arg(long, default_value = "auto")]
    pub aspect_ratio: String,

    /// Instruction appended to every prompt
    #[arg(long, default_value = DEFAULT_PROMPT_SUFFIX)]
    pub prompt_suffix: String,

    /// Do not wrap the rendered prompt in double quotes
    #[arg(long)]
    pub no_prompt_quotes: bool,

    /// Override the queue endpoint
    #[arg(long, value_name = "URL")]
    pub queue_url: Option<String>,

    /// Override the storage endpoint
    #[arg(long, value_name = "URL")]
    pub storage_url: Option<String>,

    /// Delay between job status polls in milliseconds
    #[arg(long, default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Timeout of each individual HTTP call to the edit service
    #[arg(long, default_value_t = 300)]
    pub request_timeout_secs: u64,

    /// How long produced images stay downloadable
    #[arg(long, default_value_t = 3600)]
    pub retention_secs: u64,

    /// How often expired images are swept
    #[arg(long, default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Maximum request body size in MiB
    #[arg(long, default_value_t = 32)]
    pub max_upload_mb: usize,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.log_format.into()).context("Failed to initialize tracing")?;

    let service = CliConfigBuilder::service_config(&cli)?;
    let server = CliConfigBuilder::server_config(&cli)?;

    info!(
        resolution = %service.resolution,
        aspect_ratio = %service.aspect_ratio,
        "Starting mask-recontext server"
    );

    crate::server::run(server, service)
        .await
        .context("Server terminated with an error")
}
