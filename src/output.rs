//! Output types produced by the fetch pipeline.
//!
//! Everything the caller sees is serialisable so the CLI's `--json` mode (and
//! any protocol layer on top) can emit a [`FetchOutput`] as-is. Raw byte
//! buffers are skipped during serialisation; the inline image travels as a
//! data URI instead.

use crate::error::SkippedImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An image mentioned by the document, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Absolute URL, already resolved against the document URL.
    pub source_url: String,
    /// `alt` attribute, empty if absent.
    pub alt_text: String,
    /// Last path segment of the URL, or `image` if there is none.
    pub suggested_filename: String,
}

/// Raw bytes of one accepted image.
///
/// At most one buffer exists per accepted reference. Consumed by the
/// compositor.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pub reference: ImageReference,
    /// Position of the reference in the full (unpaginated) list.
    pub index: usize,
    /// URL the bytes were actually served from, after redirects.
    pub final_url: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// The single encoded image produced by stacking the accepted buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeArtifact {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    /// Buffers actually drawn; the rest fell below the height cap or did not
    /// decode.
    pub images_placed: usize,
}

/// A validated, size-bounded document body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedDocument {
    /// URL as requested.
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    /// `Content-Type` header value, or empty.
    pub content_type: String,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    /// Body size in bytes before decoding.
    pub bytes: usize,
    /// Redirects followed.
    pub hops: u32,
}

impl FetchedDocument {
    /// True when the declared type is HTML, or when no type was declared and
    /// the body looks like markup.
    pub fn is_html(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        if ct.contains("html") {
            return true;
        }
        if !ct.is_empty() {
            return false;
        }
        let head: String = self.body.trim_start().chars().take(256).collect();
        let head = head.to_ascii_lowercase();
        head.starts_with("<!doctype html") || head.starts_with("<html")
    }
}

/// Where a persisted artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocator {
    /// `file://` URI of the stored artifact.
    pub uri: String,
    pub path: PathBuf,
    pub name: String,
    pub mime_type: String,
    pub size: usize,
}

/// Composite metadata as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSummary {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    /// Encoded size in bytes.
    pub bytes: usize,
    pub images_placed: usize,
    /// `data:` URI, present in `inline` and `both` output modes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_uri: Option<String>,
}

/// Complete result of [`crate::fetch::fetch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOutput {
    pub url: String,
    pub final_url: String,
    pub content_type: String,

    /// The requested character window of the extracted (or raw) text.
    pub text: String,
    /// Character offset the window started at.
    pub start_index: usize,
    /// Total characters available.
    pub total_chars: usize,
    /// Characters after the end of the window.
    pub remaining_chars: usize,

    /// Zero or one composite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeSummary>,
    /// The composite itself, for library callers.
    #[serde(skip)]
    pub artifact: Option<CompositeArtifact>,
    /// References after the end of the image window.
    pub remaining_images: usize,
    /// Per-image failures inside the window.
    pub skipped_images: Vec<SkippedImage>,
    /// Locators for persisted artifacts, composite first.
    pub locators: Vec<StorageLocator>,

    pub stats: FetchStats,
}

/// Counters for one fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchStats {
    pub hops: u32,
    pub document_bytes: usize,
    /// References found in the document (before pagination).
    pub image_references: usize,
    pub images_acquired: usize,
    pub images_skipped: usize,
    pub robots_checked: bool,
    pub total_duration_ms: u64,
}
