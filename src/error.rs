//! Error types for the edgequake-webfetch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FetchError`]: **Fatal** for the primary document: the URL was
//!   rejected by the SSRF guard, the redirect budget ran out, the body was too
//!   large. Returned as `Err(FetchError)` from the top-level `fetch*` functions.
//!
//! * [`SkippedImage`]: **Non-fatal**: a single image reference failed one of
//!   the same checks, so it was dropped from the batch. Stored inside
//!   [`crate::output::FetchOutput`] so callers can see why an image is missing
//!   without losing the rest of the page.
//!
//! Every [`FetchError`] carries a stable [`FetchError::reason_code`] so callers
//! (and logs) can match on the failure without parsing the message text.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-webfetch library.
///
/// Image-level failures are downgraded to [`SkippedImage`] by the acquisition
/// pipeline rather than propagated here.
#[derive(Debug, Error)]
pub enum FetchError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The input could not be parsed as an absolute URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Only `http` and `https` are fetched.
    #[error("Scheme '{scheme}' is not allowed for '{url}': only http and https are fetched")]
    SchemeNotAllowed { url: String, scheme: String },

    /// The host is, or resolves to, a private/reserved address.
    ///
    /// `via_dns` distinguishes an IP literal in the URL from a hostname whose
    /// DNS answer pointed into private space (the rebinding case).
    #[error("Blocked request to '{host}': {addr} is a private or reserved address{}", dns_suffix(.via_dns))]
    AddressPrivate {
        host: String,
        addr: std::net::IpAddr,
        via_dns: bool,
    },

    /// `localhost`, a subdomain of it, or a `.local` mDNS name.
    #[error("Blocked request to local hostname '{host}'")]
    LocalHostname { host: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// An attempt, body read, or image operation exceeded its deadline.
    #[error("Request to '{url}' timed out after {ms}ms")]
    Timeout { url: String, ms: u64 },

    /// The redirect chain was longer than the configured hop budget.
    #[error("Too many redirects fetching '{url}' (limit {max_hops})")]
    TooManyRedirects { url: String, max_hops: u32 },

    /// A 3xx response arrived without a usable `Location` header.
    #[error("HTTP {status} redirect from '{url}' has no Location header")]
    MissingRedirectLocation { url: String, status: u16 },

    /// The connection or request failed below HTTP (DNS, TCP, TLS).
    #[error("Request to '{url}' failed: {reason}")]
    RequestFailed { url: String, reason: String },

    /// The final response was not a success status.
    #[error("HTTP {status} fetching '{url}'")]
    HttpStatus { url: String, status: u16 },

    // ── Body errors ───────────────────────────────────────────────────────
    /// `Content-Length` announced more bytes than the limit allows.
    #[error("Response declares {declared} bytes, over the {limit} byte limit")]
    DeclaredTooLarge { declared: u64, limit: usize },

    /// The streamed body crossed the limit while being read.
    #[error("Response body exceeded the {limit} byte limit")]
    BodyTooLarge { limit: usize },

    // ── Policy errors ─────────────────────────────────────────────────────
    /// robots.txt explicitly disallows the path for our user agent.
    #[error("robots.txt on '{origin}' disallows fetching '{url}'\nPass --ignore-robots to override.")]
    RobotsDisallowed { url: String, origin: String },

    /// Same-origin policy rejected an image hosted elsewhere.
    #[error("Image '{url}' is not on the document origin '{origin}'")]
    CrossOrigin { url: String, origin: String },

    // ── Image errors ──────────────────────────────────────────────────────
    /// Nothing (decodable) was handed to the compositor.
    #[error("No images to composite")]
    NoImagesToComposite,

    /// An image buffer could not be decoded.
    #[error("Failed to decode image '{url}': {detail}")]
    ImageDecode { url: String, detail: String },

    /// The composed canvas could not be encoded.
    #[error("Failed to encode composite image: {0}")]
    ImageEncode(String),

    // ── Persistence errors ────────────────────────────────────────────────
    /// Saving an artifact failed. Always logged and never fatal to a fetch.
    #[error("Failed to persist resource to '{path}': {source}")]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn dns_suffix(via_dns: &bool) -> &'static str {
    if *via_dns {
        " (resolved via DNS)"
    } else {
        ""
    }
}

impl FetchError {
    /// Stable, kebab-case identifier for the failure.
    pub fn reason_code(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl { .. } => "invalid-url",
            FetchError::SchemeNotAllowed { .. } => "scheme-not-allowed",
            FetchError::AddressPrivate { via_dns: false, .. } => "address-private",
            FetchError::AddressPrivate { via_dns: true, .. } => "resolves-private",
            FetchError::LocalHostname { .. } => "local-hostname",
            FetchError::Timeout { .. } => "timeout",
            FetchError::TooManyRedirects { .. } => "too-many-redirects",
            FetchError::MissingRedirectLocation { .. } => "missing-redirect-location",
            FetchError::RequestFailed { .. } => "request-failed",
            FetchError::HttpStatus { .. } => "http-status",
            FetchError::DeclaredTooLarge { .. } => "declared-too-large",
            FetchError::BodyTooLarge { .. } => "body-too-large",
            FetchError::RobotsDisallowed { .. } => "robots-disallowed",
            FetchError::CrossOrigin { .. } => "cross-origin",
            FetchError::NoImagesToComposite => "no-input",
            FetchError::ImageDecode { .. } => "image-decode",
            FetchError::ImageEncode(_) => "image-encode",
            FetchError::PersistenceFailed { .. } => "persistence-failed",
            FetchError::InvalidConfig(_) => "invalid-config",
            FetchError::Internal(_) => "internal",
        }
    }

    /// True for the rejections produced by the SSRF validator.
    pub fn is_ssrf_rejection(&self) -> bool {
        matches!(
            self,
            FetchError::AddressPrivate { .. } | FetchError::LocalHostname { .. }
        )
    }
}

/// A non-fatal failure for a single image reference.
///
/// Stored in [`crate::output::FetchOutput::skipped_images`]. The batch
/// continues regardless.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SkippedImage {
    /// 0-based position of the reference in the full (unpaginated) list.
    pub index: usize,
    /// The reference's source URL as extracted.
    pub url: String,
    /// [`FetchError::reason_code`] of the failure.
    pub reason: String,
    /// Human-readable description.
    pub detail: String,
}

impl SkippedImage {
    pub fn new(index: usize, url: impl Into<String>, error: &FetchError) -> Self {
        Self {
            index,
            url: url.into(),
            reason: error.reason_code().to_string(),
            detail: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn address_private_reason_depends_on_source() {
        let literal = FetchError::AddressPrivate {
            host: "10.0.0.1".into(),
            addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            via_dns: false,
        };
        let resolved = FetchError::AddressPrivate {
            host: "rebind.example".into(),
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            via_dns: true,
        };
        assert_eq!(literal.reason_code(), "address-private");
        assert_eq!(resolved.reason_code(), "resolves-private");
        assert!(resolved.to_string().contains("resolved via DNS"));
        assert!(!literal.to_string().contains("resolved via DNS"));
    }

    #[test]
    fn too_many_redirects_display() {
        let e = FetchError::TooManyRedirects {
            url: "https://example.com/loop".into(),
            max_hops: 3,
        };
        assert!(e.to_string().contains("limit 3"));
        assert_eq!(e.reason_code(), "too-many-redirects");
    }

    #[test]
    fn declared_too_large_display() {
        let e = FetchError::DeclaredTooLarge {
            declared: 5_000_000,
            limit: 2_000_000,
        };
        let msg = e.to_string();
        assert!(msg.contains("5000000"), "got: {msg}");
        assert!(msg.contains("2000000"), "got: {msg}");
    }

    #[test]
    fn ssrf_rejection_classification() {
        assert!(FetchError::LocalHostname { host: "localhost".into() }.is_ssrf_rejection());
        assert!(!FetchError::NoImagesToComposite.is_ssrf_rejection());
    }

    #[test]
    fn skipped_image_captures_reason() {
        let err = FetchError::BodyTooLarge { limit: 10 };
        let skip = SkippedImage::new(4, "https://cdn.example/a.png", &err);
        assert_eq!(skip.index, 4);
        assert_eq!(skip.reason, "body-too-large");
        assert!(skip.detail.contains("10 byte"));
    }
}
