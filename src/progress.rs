//! Progress-callback trait for fetch and image-acquisition events.
//!
//! Inject an [`Arc<dyn FetchProgressCallback>`] via
//! [`crate::config::FetchConfigBuilder::progress_callback`] to receive events
//! as the pipeline fetches the document and walks its image window.
//!
//! # Example
//!
//! ```rust
//! use edgequake_webfetch::{FetchConfig, FetchProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct SkipCounter {
//!     skipped: AtomicUsize,
//! }
//!
//! impl FetchProgressCallback for SkipCounter {
//!     fn on_image_skipped(&self, index: usize, _total: usize, reason: &str) {
//!         self.skipped.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("image {index} skipped: {reason}");
//!     }
//! }
//!
//! let config = FetchConfig::builder()
//!     .progress_callback(Arc::new(SkipCounter { skipped: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the fetch pipeline at each stage boundary.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Image events arrive strictly in reference order
/// because acquisition is sequential.
pub trait FetchProgressCallback: Send + Sync {
    /// Called once before the document request is issued.
    fn on_fetch_start(&self, url: &str) {
        let _ = url;
    }

    /// Called when the document body has been read.
    ///
    /// # Arguments
    /// * `final_url` — URL after redirects
    /// * `bytes`     — body size in bytes
    fn on_document_complete(&self, final_url: &str, bytes: usize) {
        let _ = (final_url, bytes);
    }

    /// Called before an image in the window is validated and fetched.
    ///
    /// # Arguments
    /// * `index` — 0-based position in the full reference list
    /// * `total` — number of references inside the window
    fn on_image_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when an image was accepted.
    fn on_image_complete(&self, index: usize, total: usize, bytes: usize) {
        let _ = (index, total, bytes);
    }

    /// Called when an image was dropped.
    ///
    /// `reason` is the [`crate::error::FetchError::reason_code`].
    fn on_image_skipped(&self, index: usize, total: usize, reason: &str) {
        let _ = (index, total, reason);
    }

    /// Called once after the whole request finished successfully.
    fn on_fetch_complete(&self, images_accepted: usize) {
        let _ = images_accepted;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl FetchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FetchConfig`].
pub type ProgressCallback = Arc<dyn FetchProgressCallback>;
