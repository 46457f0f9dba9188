//! Vertical compositor: stack the accepted images into one JPEG.
//!
//! ## Why spawn_blocking?
//!
//! Decoding, resizing and JPEG encoding are CPU-bound and can take hundreds of
//! milliseconds on large inputs. Running them on the blocking pool keeps the
//! Tokio workers free, and wrapping the task in a timeout makes the compositor
//! a cancellable suspension point like the network stages.
//!
//! ## Canvas size
//!
//! Width is `min(max_width, widest image)`. Height is `min(max_height, sum of
//! heights)`, where the sum is taken **before** wide images are scaled down.
//! Resizing only ever shrinks, so the canvas can end up taller than the
//! stacked images and carry white space at the bottom.

use crate::config::CompositeOptions;
use crate::error::FetchError;
use crate::output::{CompositeArtifact, ImageBuffer};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Limits, Rgba, RgbaImage};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, warn};

/// Hard ceiling on JPEG quality, whatever the request asked for.
pub const MAX_JPEG_QUALITY: u8 = 85;

/// MIME type of every composite.
pub const COMPOSITE_MIME: &str = "image/jpeg";

/// Per-image decode ceiling on either axis.
const MAX_DECODE_DIMENSION: u32 = 16_384;
/// Per-image decode allocation ceiling.
const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// Composite `buffers` top to bottom, consuming them.
///
/// # Errors
/// - [`FetchError::NoImagesToComposite`] if `buffers` is empty or nothing
///   decodes
/// - [`FetchError::Timeout`] if the work outlives `timeout`
/// - [`FetchError::ImageEncode`] if the canvas cannot be encoded
pub async fn composite(
    buffers: Vec<ImageBuffer>,
    options: CompositeOptions,
    timeout: Duration,
) -> Result<CompositeArtifact, FetchError> {
    if buffers.is_empty() {
        return Err(FetchError::NoImagesToComposite);
    }

    // The blocking thread is not interrupted on timeout; its result is dropped.
    let task = tokio::task::spawn_blocking(move || composite_blocking(buffers, options));
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(FetchError::Timeout {
            url: "<composite>".to_string(),
            ms: timeout.as_millis() as u64,
        }),
        Ok(Err(e)) => Err(FetchError::Internal(format!(
            "Composite task panicked: {}",
            e
        ))),
        Ok(Ok(result)) => result,
    }
}

/// Blocking implementation of [`composite`].
pub fn composite_blocking(
    buffers: Vec<ImageBuffer>,
    options: CompositeOptions,
) -> Result<CompositeArtifact, FetchError> {
    if buffers.is_empty() {
        return Err(FetchError::NoImagesToComposite);
    }

    let decoded: Vec<DynamicImage> = buffers
        .into_iter()
        .filter_map(|buffer| match decode(&buffer) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!("Not compositing image {}: {}", buffer.index, e);
                None
            }
        })
        .collect();
    if decoded.is_empty() {
        return Err(FetchError::NoImagesToComposite);
    }

    let (canvas_width, canvas_height) = canvas_size(
        decoded.iter().map(|img| (img.width(), img.height())),
        options.max_width,
        options.max_height,
    );
    debug!(
        "Compositing {} image(s) onto {}x{} canvas",
        decoded.len(),
        canvas_width,
        canvas_height
    );

    let mut canvas = RgbaImage::from_pixel(canvas_width, canvas_height, Rgba([255, 255, 255, 255]));
    let mut offset: u32 = 0;
    let mut placed = 0;

    for img in decoded {
        if offset >= options.max_height {
            break;
        }
        let img = if img.width() > canvas_width {
            let height = scaled_height(img.width(), img.height(), canvas_width);
            img.resize_exact(canvas_width, height, FilterType::Triangle)
        } else {
            img
        };
        imageops::overlay(&mut canvas, &img.to_rgba8(), 0, i64::from(offset));
        offset = offset.saturating_add(img.height());
        placed += 1;
    }

    let quality = options.quality.clamp(1, MAX_JPEG_QUALITY);
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(&rgb)
        .map_err(|e| FetchError::ImageEncode(e.to_string()))?;

    debug!(
        "Composite: {} placed, {} bytes at quality {}",
        placed,
        bytes.len(),
        quality
    );
    Ok(CompositeArtifact {
        bytes,
        width: canvas_width,
        height: canvas_height,
        mime_type: COMPOSITE_MIME.to_string(),
        images_placed: placed,
    })
}

fn decode(buffer: &ImageBuffer) -> Result<DynamicImage, FetchError> {
    let err = |detail: String| FetchError::ImageDecode {
        url: buffer.final_url.clone(),
        detail,
    };

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);

    let mut reader = ImageReader::new(Cursor::new(buffer.bytes.as_slice()))
        .with_guessed_format()
        .map_err(|e| err(e.to_string()))?;
    reader.limits(limits);
    reader.decode().map_err(|e| err(e.to_string()))
}

/// `(min(max_width, widest), min(max_height, Σ heights))`, each at least 1.
pub fn canvas_size(
    dims: impl IntoIterator<Item = (u32, u32)>,
    max_width: u32,
    max_height: u32,
) -> (u32, u32) {
    let (widest, total_height) = dims
        .into_iter()
        .fold((0u32, 0u64), |(w, h), (iw, ih)| (w.max(iw), h + u64::from(ih)));
    let width = widest.min(max_width).max(1);
    let height = total_height.min(u64::from(max_height)).max(1) as u32;
    (width, height)
}

/// Height after scaling `width` down to `target_width`, rounded, at least 1.
fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = (u64::from(height) * u64::from(target_width) + u64::from(width) / 2)
        / u64::from(width);
    scaled.max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ImageReference;
    use crate::testutil::{jpeg_of, png_of};

    fn buffer(index: usize, bytes: Vec<u8>) -> ImageBuffer {
        ImageBuffer {
            reference: ImageReference {
                source_url: format!("https://example.com/{index}.img"),
                alt_text: String::new(),
                suggested_filename: format!("{index}.img"),
            },
            index,
            final_url: format!("https://example.com/{index}.img"),
            bytes,
            content_type: String::new(),
        }
    }

    fn options(max_width: u32, max_height: u32) -> CompositeOptions {
        CompositeOptions {
            max_width,
            max_height,
            quality: 80,
        }
    }

    fn decode_output(artifact: &CompositeArtifact) -> DynamicImage {
        image::load_from_memory(&artifact.bytes).unwrap()
    }

    #[tokio::test]
    async fn wide_image_is_scaled_to_canvas_width() {
        let buffers = vec![buffer(0, jpeg_of(800, 10)), buffer(1, jpeg_of(1200, 10))];
        let artifact = composite(buffers, options(1000, 1600), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(artifact.width, 1000);
        // Pre-resize sum: 10 + 10.
        assert_eq!(artifact.height, 20);
        assert_eq!(artifact.images_placed, 2);
        assert_eq!(artifact.mime_type, "image/jpeg");
        let out = decode_output(&artifact);
        assert_eq!((out.width(), out.height()), (1000, 20));
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let err = composite(Vec::new(), options(1000, 1600), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NoImagesToComposite));
        assert_eq!(err.reason_code(), "no-input");
    }

    #[test]
    fn undecodable_buffers_are_skipped() {
        let artifact = composite_blocking(
            vec![buffer(0, b"<html>not an image</html>".to_vec()), buffer(1, png_of(40, 30))],
            options(1000, 1600),
        )
        .unwrap();
        assert_eq!(artifact.images_placed, 1);
        assert_eq!((artifact.width, artifact.height), (40, 30));

        let err = composite_blocking(vec![buffer(0, vec![0, 1, 2, 3])], options(1000, 1600))
            .unwrap_err();
        assert!(matches!(err, FetchError::NoImagesToComposite));
    }

    #[test]
    fn placement_stops_at_height_cap() {
        let buffers = (0..3).map(|i| buffer(i, png_of(100, 100))).collect();
        let artifact = composite_blocking(buffers, options(1000, 150)).unwrap();
        assert_eq!(artifact.height, 150);
        // Offsets 0 and 100 are below the cap; 200 is not.
        assert_eq!(artifact.images_placed, 2);
    }

    #[test]
    fn narrow_images_are_not_upscaled() {
        let artifact = composite_blocking(
            vec![buffer(0, png_of(50, 20)), buffer(1, png_of(30, 20))],
            options(1000, 1600),
        )
        .unwrap();
        assert_eq!((artifact.width, artifact.height), (50, 40));
    }

    #[test]
    fn quality_is_capped() {
        let encode = |quality| {
            composite_blocking(
                vec![buffer(0, jpeg_of(64, 64))],
                CompositeOptions {
                    max_width: 1000,
                    max_height: 1600,
                    quality,
                },
            )
            .unwrap()
            .bytes
        };
        assert_eq!(encode(100), encode(MAX_JPEG_QUALITY));
        assert_ne!(encode(10), encode(MAX_JPEG_QUALITY));
    }

    #[test]
    fn transparency_is_flattened_onto_white() {
        let clear = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(clear)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let artifact = composite_blocking(vec![buffer(0, png.into_inner())], options(1000, 1600))
            .unwrap();
        let out = decode_output(&artifact).to_rgb8();
        assert!(out.get_pixel(4, 4).0.iter().all(|c| *c > 240));
    }

    #[test]
    fn canvas_size_rules() {
        assert_eq!(canvas_size([(800, 10), (1200, 10)], 1000, 1600), (1000, 20));
        assert_eq!(canvas_size([(300, 900), (200, 900)], 1000, 1600), (300, 1600));
        assert_eq!(scaled_height(1200, 10, 1000), 8);
        assert_eq!(scaled_height(5000, 1, 100), 1);
    }
}
