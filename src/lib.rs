#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Mask Recontext
//!
//! Composite a hand-drawn mask over an image and hand the result to a
//! generative edit model, which redraws the marked region from a text prompt.
//!
//! The crate is split in two stages that run strictly in sequence:
//!
//! - **Compositor**: alpha-composites the mask over the base image and writes
//!   a lossless PNG
//! - **Recontextualizer**: uploads that PNG, submits an edit job, waits for it
//!   and overwrites the PNG in place with the first returned image
//!
//! An HTTP server (`server` module, `mask-recontext` binary) wraps both stages
//! behind a single `POST /process` endpoint.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mask_recontext::{combine_files, Recontextualizer, ServiceConfig};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! combine_files(
//!     Path::new("photo.png"),
//!     Path::new("mask.png"),
//!     Path::new("combined.png"),
//! )?;
//!
//! let config = ServiceConfig::builder()
//!     .api_key(std::env::var("FAL_KEY")?)
//!     .build()?;
//! let recontextualizer = Recontextualizer::from_config(&config)?;
//! recontextualizer
//!     .recontextualize(Path::new("combined.png"), Some("add a blue sky"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): server binary, argument parsing and subscriber setup
//! - `webp-support` (default): WebP decoding of uploaded images
//! - `tracing-json`: JSON log output

#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompt;
pub mod recontext;
pub mod server;
pub mod storage;
pub mod tracing_config;

pub use compositor::{combine, combine_files, combine_images};
pub use config::{AspectRatio, Resolution, ServerConfig, ServiceConfig};
pub use error::{RecontextError, Result};
pub use pipeline::{PipelineTimings, ProcessOutcome, ProcessRequest, ProcessingPipeline, Upload};
pub use prompt::PromptTemplate;
pub use recontext::{
    EditJob, EditRequest, EditResult, EditService, EditSettings, FalClient, JobStatus, OutputImage,
    Recontextualizer,
};
pub use storage::{RequestFiles, UploadStore};
#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{events, spans, TracingConfig, TracingFormat};
