//! Upload directory management
//!
//! Every uploaded or produced file lives directly under one root directory
//! and is named by a fresh v4 UUID. Handlers receive the store explicitly;
//! nothing refers to the directory through global state.

use crate::error::{RecontextError, Result};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// URL prefix under which files of the store are served
pub const PUBLIC_PREFIX: &str = "/uploads";

/// Extension given to files whose upload name has none
const FALLBACK_EXTENSION: &str = "bin";

/// Longest extension kept from a client-supplied file name
const MAX_EXTENSION_LEN: usize = 8;

/// Directory holding request-scoped images
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Open the store, creating the directory if needed
    ///
    /// # Errors
    /// - Failed to create or canonicalize the directory
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| RecontextError::file_io_error("create upload directory", root, &e))?;
        let root = root
            .canonicalize()
            .map_err(|e| RecontextError::file_io_error("resolve upload directory", root, &e))?;

        debug!(root = %root.display(), "Upload store ready");
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an uploaded file under a fresh name, keeping its extension
    ///
    /// # Errors
    /// - Failed to write the file
    pub async fn save_upload(&self, original_name: Option<&str>, bytes: &[u8]) -> Result<PathBuf> {
        let extension = original_name.map_or_else(|| FALLBACK_EXTENSION.to_string(), sanitize_extension);
        let path = self.root.join(format!("{}.{}", Uuid::new_v4(), extension));

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RecontextError::file_io_error("write upload", &path, &e))?;

        debug!(path = %path.display(), bytes = bytes.len(), "Saved upload");
        Ok(path)
    }

    /// Fresh path for a combined image; nothing is created
    #[must_use]
    pub fn allocate_output(&self) -> PathBuf {
        self.root.join(format!("{}.png", Uuid::new_v4()))
    }

    /// Public URL of a file inside the store
    #[must_use]
    pub fn public_url(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let relative = relative.to_str()?;
        Some(format!("{}/{}", PUBLIC_PREFIX, relative.replace('\\', "/")))
    }

    /// Map a client-requested relative path onto an existing file in the store
    ///
    /// Absolute paths, parent or current-directory components, and anything
    /// that escapes the root through symlinks resolve to `None`.
    #[must_use]
    pub fn resolve(&self, requested: &str) -> Option<PathBuf> {
        if requested.is_empty() || requested.contains('\0') || requested.contains('\\') {
            return None;
        }

        let relative = Path::new(requested);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return None;
        }

        let candidate = self.root.join(relative).canonicalize().ok()?;
        if !candidate.starts_with(&self.root) || !candidate.is_file() {
            return None;
        }

        Some(candidate)
    }

    /// Start tracking the files of one request
    #[must_use]
    pub fn begin_request(&self) -> RequestFiles {
        RequestFiles::default()
    }

    /// Delete regular files whose modification time is older than `retention`
    ///
    /// Returns the number of files removed.
    ///
    /// # Errors
    /// - Failed to list the upload directory
    pub fn sweep_expired(&self, retention: Duration) -> Result<usize> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| RecontextError::invalid_config(format!("retention out of range: {}", e)))?;
        let cutoff = Utc::now() - retention;

        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| RecontextError::file_io_error("list upload directory", &self.root, &e))?;

        let mut removed = 0;
        for entry in entries.filter_map(std::result::Result::ok) {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };

            if DateTime::<Utc>::from(modified) < cutoff {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove expired file"),
                }
            }
        }

        if removed > 0 {
            info!(removed, "Swept expired uploads");
        }
        Ok(removed)
    }
}

/// Run [`UploadStore::sweep_expired`] every `interval` until the task is aborted
pub fn spawn_retention_sweeper(
    store: Arc<UploadStore>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.sweep_expired(retention)).await {
                Ok(Ok(_)) => {},
                Ok(Err(e)) => warn!(error = %e, "Upload sweep failed"),
                Err(e) => warn!(error = %e, "Upload sweep task panicked"),
            }
        }
    })
}

/// Files owned by one request
///
/// Inputs are deleted when the guard drops. The output is deleted too unless
/// [`RequestFiles::keep_output`] was called, so failed requests leave nothing
/// behind.
#[derive(Debug, Default)]
pub struct RequestFiles {
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    keep_output: bool,
}

impl RequestFiles {
    pub fn track_input(&mut self, path: PathBuf) {
        self.inputs.push(path);
    }

    pub fn track_output(&mut self, path: PathBuf) {
        self.output = Some(path);
    }

    /// Release the output from cleanup and return its path
    pub fn keep_output(&mut self) -> Option<PathBuf> {
        self.keep_output = true;
        self.output.clone()
    }
}

impl Drop for RequestFiles {
    fn drop(&mut self) {
        let doomed = self
            .inputs
            .iter()
            .chain(self.output.iter().filter(|_| !self.keep_output));

        for path in doomed {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed request file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove request file"),
            }
        }
    }
}

fn sanitize_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}
