//! Image acquisition: fetch a paginated window of image references through the
//! same validator, redirect loop and capped reader as the document.
//!
//! ## Why sequential?
//!
//! References come from attacker-controlled markup. Fetching them one at a
//! time means a single slow or malicious origin can hold at most one socket
//! open against us, and images land in exactly the order they appear in the
//! document. The window is capped at a handful of images, so the latency cost
//! is small.
//!
//! ## Failure policy
//!
//! A reference that fails any step is recorded as a [`SkippedImage`] and the
//! walk continues. Partial success is the normal outcome; callers page through
//! the rest with a later window.

use crate::config::{FetchConfig, OriginPolicy, PaginationWindow};
use crate::error::{FetchError, SkippedImage};
use crate::output::{ImageBuffer, ImageReference};
use crate::pipeline::body::read_bounded;
use crate::pipeline::redirect::{fetch_success, validate_bounded, RedirectPolicy};
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use std::pin::pin;
use tracing::{debug, info, warn};

/// Result of walking one image window.
#[derive(Debug, Default)]
pub struct Acquisition {
    /// Accepted images in reference order, at most `window.max_count`.
    pub buffers: Vec<ImageBuffer>,
    /// References inside the window that were dropped, in order.
    pub skipped: Vec<SkippedImage>,
    /// References after the end of the window.
    pub remaining: usize,
}

/// Fetch the references inside `window`, strictly in order.
///
/// `document_url` is the document's final URL; it defines the origin for
/// [`OriginPolicy::SameOrigin`].
pub async fn acquire(
    references: &[ImageReference],
    window: PaginationWindow,
    origin_policy: OriginPolicy,
    document_url: &Url,
    config: &FetchConfig,
) -> Acquisition {
    // Callers may build or deserialize a window directly; re-apply the cap.
    let window = PaginationWindow::images(window.start_index, window.max_count);
    let range = window.range(references.len());
    let total = range.len();
    info!(
        "Acquiring images {}..{} of {} ({:?})",
        range.start,
        range.end,
        references.len(),
        origin_policy
    );

    let mut acquisition = Acquisition {
        remaining: window.remaining(references.len()),
        ..Acquisition::default()
    };

    let outcomes = stream::iter(range).then(|index| async move {
        if let Some(cb) = &config.progress_callback {
            cb.on_image_start(index, total);
        }
        let outcome =
            acquire_one(index, &references[index], origin_policy, document_url, config).await;
        (index, outcome)
    });
    let mut outcomes = pin!(outcomes);

    while let Some((index, outcome)) = outcomes.next().await {
        let reference = &references[index];
        match outcome {
            Ok(buffer) => {
                debug!(
                    "Image {} accepted: {} bytes from '{}'",
                    index,
                    buffer.bytes.len(),
                    buffer.final_url
                );
                if let Some(cb) = &config.progress_callback {
                    cb.on_image_complete(index, total, buffer.bytes.len());
                }
                acquisition.buffers.push(buffer);
            }
            Err(e) => {
                warn!("Skipping image {} '{}': {}", index, reference.source_url, e);
                if let Some(cb) = &config.progress_callback {
                    cb.on_image_skipped(index, total, e.reason_code());
                }
                acquisition
                    .skipped
                    .push(SkippedImage::new(index, &reference.source_url, &e));
            }
        }
    }
    acquisition
}

async fn acquire_one(
    index: usize,
    reference: &ImageReference,
    origin_policy: OriginPolicy,
    document_url: &Url,
    config: &FetchConfig,
) -> Result<ImageBuffer, FetchError> {
    let target = validate_bounded(&reference.source_url, config.timeout(), config).await?;
    check_origin(&target.url, document_url, origin_policy)?;

    let fetched = fetch_success(
        target,
        &image_headers(),
        RedirectPolicy::from_config(config),
        config,
    )
    .await?;
    // A same-origin image may still redirect off-origin.
    check_origin(&fetched.final_url, document_url, origin_policy)?;

    let final_url = fetched.final_url.to_string();
    let body = read_bounded(fetched.response, config.max_image_bytes, config.timeout()).await?;
    Ok(ImageBuffer {
        reference: reference.clone(),
        index,
        final_url,
        bytes: body.bytes,
        content_type: body.content_type,
    })
}

/// Apply the origin policy to an image URL.
pub fn check_origin(
    image_url: &Url,
    document_url: &Url,
    policy: OriginPolicy,
) -> Result<(), FetchError> {
    match policy {
        OriginPolicy::CrossOrigin => Ok(()),
        OriginPolicy::SameOrigin if image_url.origin() == document_url.origin() => Ok(()),
        OriginPolicy::SameOrigin => Err(FetchError::CrossOrigin {
            url: image_url.to_string(),
            origin: document_url.origin().ascii_serialization(),
        }),
    }
}

fn image_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("image/avif,image/webp,image/png,image/jpeg,image/*;q=0.8"),
    );
    headers
}
