//! Shared helpers for integration tests: generated images and a scripted
//! in-memory edit service.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use mask_recontext::{
    EditJob, EditRequest, EditResult, EditService, OutputImage, RecontextError, Result,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Encode an image to bytes in the given format
pub fn encode(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .write_to(&mut buffer, format)
            .unwrap(),
        _ => image.write_to(&mut buffer, format).unwrap(),
    }
    buffer.into_inner()
}

/// Opaque single-colour image
pub fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// Fully transparent image with a filled circle of `color` in the centre
pub fn circle_mask(width: u32, height: u32, radius: f32, color: [u8; 4]) -> RgbaImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    RgbaImage::from_fn(width, height, |x, y| {
        let (dx, dy) = (x as f32 + 0.5 - cx, y as f32 + 0.5 - cy);
        if dx * dx + dy * dy <= radius * radius {
            Rgba(color)
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// What the scripted service does once it is called
#[derive(Debug, Clone)]
pub enum Script {
    /// Complete the job and serve these bytes as the only output image
    Returns(Vec<u8>),
    /// Complete the job with an empty `images` list
    NoImages,
    /// Fail at the upload step
    FailUpload(String),
    /// Fail the job after submission
    FailJob(String),
    /// Like `Returns`, but the first job stays pending until `release` is notified
    HoldFirst { release: Arc<Notify>, bytes: Vec<u8> },
}

/// In-memory `EditService` that records every call
#[derive(Debug)]
pub struct ScriptedService {
    script: Script,
    pub uploads: AtomicUsize,
    pub submits: AtomicUsize,
    pub waits: AtomicUsize,
    pub downloads: AtomicUsize,
    pub uploaded: Mutex<Vec<Vec<u8>>>,
    pub requests: Mutex<Vec<(String, EditRequest)>>,
}

impl ScriptedService {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            uploads: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            uploaded: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> [usize; 4] {
        [
            self.uploads.load(Ordering::SeqCst),
            self.submits.load(Ordering::SeqCst),
            self.waits.load(Ordering::SeqCst),
            self.downloads.load(Ordering::SeqCst),
        ]
    }

    pub fn last_request(&self) -> Option<(String, EditRequest)> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EditService for ScriptedService {
    async fn upload(&self, path: &Path) -> Result<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Script::FailUpload(reason) = &self.script {
            return Err(RecontextError::upload(reason.clone()));
        }
        let bytes = tokio::fs::read(path).await?;
        self.uploaded.lock().unwrap().push(bytes);
        Ok("https://cdn.test/composite.png".to_string())
    }

    async fn submit(&self, model_id: &str, request: &EditRequest) -> Result<EditJob> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((model_id.to_string(), request.clone()));
        Ok(EditJob {
            model_id: model_id.to_string(),
            request_id: format!("req-{}", n),
        })
    }

    async fn wait_for_result(&self, job: &EditJob) -> Result<EditResult> {
        let n = self.waits.fetch_add(1, Ordering::SeqCst);
        if let Script::HoldFirst { release, .. } = &self.script {
            if n == 0 {
                release.notified().await;
            }
        }
        match &self.script {
            Script::FailJob(reason) => Err(RecontextError::job_failed(&job.request_id, reason.clone())),
            Script::NoImages => Ok(EditResult::default()),
            _ => Ok(EditResult {
                images: vec![OutputImage {
                    url: "https://cdn.test/result.png".to_string(),
                    content_type: Some("image/png".to_string()),
                    file_name: None,
                    width: None,
                    height: None,
                }],
                description: None,
            }),
        }
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Returns(bytes) | Script::HoldFirst { bytes, .. } => Ok(bytes.clone()),
            _ => Err(RecontextError::download("nothing to download")),
        }
    }
}
