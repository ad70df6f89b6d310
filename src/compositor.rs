//! Alpha compositing of a drawn mask over a base image
//!
//! The mask is blended on top of the base with the Porter-Duff "over"
//! operator on straight (un-premultiplied) RGBA8 pixels:
//!
//! ```text
//! out_a = m_a + b_a * (1 - m_a)
//! out_c = (m_c * m_a + b_c * b_a * (1 - m_a)) / out_a
//! ```
//!
//! Over an opaque base this reduces to `a * m_c + (1 - a) * b_c`.

use crate::error::{RecontextError, Result};
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use instant::Instant;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Composite `mask` over `base`, returning a new image of the same size
///
/// # Errors
/// - [`RecontextError::DimensionMismatch`] when the two images differ in size
pub fn combine(base: &RgbaImage, mask: &RgbaImage) -> Result<RgbaImage> {
    if base.dimensions() != mask.dimensions() {
        return Err(RecontextError::DimensionMismatch {
            base: base.dimensions(),
            mask: mask.dimensions(),
        });
    }

    let mut combined = base.clone();
    for (dst, src) in combined.pixels_mut().zip(mask.pixels()) {
        *dst = over(*dst, *src);
    }

    Ok(combined)
}

/// Composite two decoded images of any color type
///
/// Both inputs are converted to RGBA8 first, so grayscale, palette and RGB
/// sources composite the same way.
///
/// # Errors
/// - [`RecontextError::DimensionMismatch`] when the two images differ in size
pub fn combine_images(base: &DynamicImage, mask: &DynamicImage) -> Result<RgbaImage> {
    combine(&base.to_rgba8(), &mask.to_rgba8())
}

/// Load base and mask from disk, composite them, and save the result as PNG
///
/// Exactly one file is written on success and none on failure.
///
/// # Errors
/// - [`RecontextError::NotFound`] if either input is missing
/// - [`RecontextError::CompositeFailure`] on decode or encode failure
/// - [`RecontextError::DimensionMismatch`] if the sizes differ
#[instrument(skip_all, fields(base = %base_path.display(), mask = %mask_path.display()))]
pub fn combine_files(base_path: &Path, mask_path: &Path, output_path: &Path) -> Result<()> {
    let start = Instant::now();

    let result = load_rgba(base_path)
        .and_then(|base| Ok((base, load_rgba(mask_path)?)))
        .and_then(|(base, mask)| combine(&base, &mask))
        .and_then(|combined| save_png(&combined, output_path));

    match &result {
        Ok(()) => info!(
            output = %output_path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Combined image and mask"
        ),
        Err(e) => warn!(error = %e, "Compositing failed"),
    }

    result
}

fn over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let [sr, sg, sb, sa] = src.0;
    match sa {
        0 => return dst,
        255 => return src,
        _ => {},
    }

    let [dr, dg, db, da] = dst.0;
    let src_a = f32::from(sa) / 255.0;
    let dst_a = f32::from(da) / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);

    // out_a >= src_a > 0 here
    let blend = |s: u8, d: u8| -> u8 {
        let value = (f32::from(s) * src_a + f32::from(d) * dst_a * (1.0 - src_a)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        blend(sr, dr),
        blend(sg, dg),
        blend(sb, db),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn load_rgba(path: &Path) -> Result<RgbaImage> {
    if !path.exists() {
        return Err(RecontextError::NotFound(path.to_path_buf()));
    }

    // Uploaded files keep the client's extension, so sniff the content instead
    let reader = ImageReader::open(path)
        .and_then(ImageReader::with_guessed_format)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RecontextError::NotFound(path.to_path_buf()),
            _ => RecontextError::CompositeFailure {
                stage: "decode",
                source: image::ImageError::IoError(e),
            },
        })?;

    let image = reader.decode().map_err(|source| RecontextError::CompositeFailure {
        stage: "decode",
        source,
    })?;

    debug!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        "Decoded compositing input"
    );

    Ok(image.to_rgba8())
}

fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| RecontextError::file_io_error("create output directory", parent, &e))?;
    }

    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| {
            if path.exists() {
                if let Err(cleanup_err) = std::fs::remove_file(path) {
                    warn!("Failed to remove partial composite: {}", cleanup_err);
                }
            }
            RecontextError::CompositeFailure {
                stage: "encode",
                source,
            }
        })
}
