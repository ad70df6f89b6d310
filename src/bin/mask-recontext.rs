//! Mask Recontext server
//!
//! Serves the image/mask upload endpoint backed by the mask_recontext library.

#[cfg(feature = "cli")]
use mask_recontext::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
