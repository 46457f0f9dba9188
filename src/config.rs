//! Configuration types for safe web fetching.
//!
//! Two structs split the knobs by lifetime:
//!
//! * [`FetchConfig`]: process-level limits (timeouts, byte caps, hop budget,
//!   SSRF guard) that are read once at startup and shared by every fetch.
//! * [`FetchRequest`]: per-call parameters (pagination windows, origin
//!   policy, output mode, compositor overrides), each clamped into a closed
//!   range by its builder before it reaches the pipeline.
//!
//! # Design choice: builder over constructor
//! Both structs have enough fields that positional constructors would be
//! unreadable. Builders let callers set only what they care about and rely on
//! documented, safety-on defaults for the rest.

use crate::error::FetchError;
use crate::pipeline::validate::{HostResolver, SystemResolver};
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 12_000;
/// Default redirect hop budget.
pub const DEFAULT_MAX_REDIRECTS: u32 = 3;
/// Default document body cap.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 2_000_000;
/// Default single-image body cap.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10_000_000;
/// Product token sent in `User-Agent` and matched in robots.txt.
pub const USER_AGENT_TOKEN: &str = "edgequake-webfetch";

/// Upper bound for an image pagination window.
pub const MAX_IMAGE_COUNT: usize = 10;
/// Upper bound for a text pagination window, in characters.
pub const MAX_TEXT_LENGTH: usize = 1_000_000;

// ── Environment snapshot ─────────────────────────────────────────────────

/// Limits read from the environment exactly once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvLimits {
    pub timeout_ms: u64,
    pub max_redirects: u32,
    pub max_document_bytes: usize,
    pub max_image_bytes: usize,
    pub ssrf_guard: bool,
}

impl Default for EnvLimits {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            ssrf_guard: true,
        }
    }
}

impl EnvLimits {
    /// Build a snapshot from an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to the default with a warning rather than
    /// failing startup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            timeout_ms: parse_var(&lookup, "WEBFETCH_TIMEOUT_MS", defaults.timeout_ms),
            max_redirects: parse_var(&lookup, "WEBFETCH_MAX_REDIRECTS", defaults.max_redirects),
            max_document_bytes: parse_var(
                &lookup,
                "WEBFETCH_MAX_HTML_BYTES",
                defaults.max_document_bytes,
            ),
            max_image_bytes: parse_var(
                &lookup,
                "WEBFETCH_MAX_IMAGE_BYTES",
                defaults.max_image_bytes,
            ),
            ssrf_guard: !lookup("WEBFETCH_DISABLE_SSRF")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
        }
    }
}

static ENV_LIMITS: Lazy<EnvLimits> = Lazy::new(|| {
    let limits = EnvLimits::from_lookup(|k| std::env::var(k).ok());
    if !limits.ssrf_guard {
        warn!("WEBFETCH_DISABLE_SSRF is set: private-network requests are NOT blocked");
    }
    limits
});

fn parse_var<T: std::str::FromStr + Copy + fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring {}={:?}: not a valid number, using {}", key, raw, default);
                default
            }
        },
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ── FetchConfig ──────────────────────────────────────────────────────────

/// Process-level configuration shared by every fetch.
///
/// Built via [`FetchConfig::builder()`], [`FetchConfig::from_env()`] or
/// [`FetchConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_webfetch::FetchConfig;
///
/// let config = FetchConfig::builder()
///     .timeout_ms(5_000)
///     .max_redirects(2)
///     .build()
///     .unwrap();
/// assert!(config.ssrf_guard);
/// ```
#[derive(Clone)]
pub struct FetchConfig {
    /// Timeout for each network operation in milliseconds. Default: 12000.
    ///
    /// Applied independently to every redirect attempt, every body read and
    /// every compositor decode/encode call. Expiry fails only that operation.
    pub timeout_ms: u64,

    /// Maximum redirect hops per logical fetch. Default: 3.
    pub max_redirects: u32,

    /// Maximum accepted document body in bytes. Default: 2 000 000.
    pub max_document_bytes: usize,

    /// Maximum accepted single-image body in bytes. Default: 10 000 000.
    pub max_image_bytes: usize,

    /// SSRF validation on/off. Default: on.
    ///
    /// Turning this off skips private-address and local-hostname checks. It
    /// exists for tests against in-process servers and must never be disabled
    /// in production.
    pub ssrf_guard: bool,

    /// `User-Agent` header value.
    pub user_agent: String,

    /// DNS resolver used by the validator.
    pub resolver: Arc<dyn HostResolver>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from_limits(EnvLimits::default())
    }
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("timeout_ms", &self.timeout_ms)
            .field("max_redirects", &self.max_redirects)
            .field("max_document_bytes", &self.max_document_bytes)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("ssrf_guard", &self.ssrf_guard)
            .field("user_agent", &self.user_agent)
            .field("resolver", &"<dyn HostResolver>")
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn FetchProgressCallback>"),
            )
            .finish()
    }
}

impl FetchConfig {
    /// Create a new builder starting from the safety-on defaults.
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Create a builder seeded from the process environment snapshot.
    ///
    /// The environment is read on first use only; later changes to the
    /// variables have no effect on this process.
    pub fn from_env() -> FetchConfigBuilder {
        FetchConfigBuilder {
            config: Self::from_limits(*ENV_LIMITS),
        }
    }

    fn from_limits(limits: EnvLimits) -> Self {
        Self {
            timeout_ms: limits.timeout_ms,
            max_redirects: limits.max_redirects,
            max_document_bytes: limits.max_document_bytes,
            max_image_bytes: limits.max_image_bytes,
            ssrf_guard: limits.ssrf_guard,
            user_agent: format!(
                "{}/{} (+https://github.com/raphaelmansuy/edgequake-webfetch)",
                USER_AGENT_TOKEN,
                env!("CARGO_PKG_VERSION")
            ),
            resolver: Arc::new(SystemResolver),
            progress_callback: None,
        }
    }

    /// Per-operation timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Builder for [`FetchConfig`].
#[derive(Debug)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms.clamp(1, 600_000);
        self
    }

    pub fn max_redirects(mut self, n: u32) -> Self {
        self.config.max_redirects = n.min(20);
        self
    }

    pub fn max_document_bytes(mut self, n: usize) -> Self {
        self.config.max_document_bytes = n;
        self
    }

    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    /// Enable or disable SSRF validation. Leave it on outside of tests.
    pub fn ssrf_guard(mut self, enabled: bool) -> Self {
        self.config.ssrf_guard = enabled;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.config.resolver = resolver;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FetchConfig, FetchError> {
        let c = &self.config;
        if c.timeout_ms == 0 {
            return Err(FetchError::InvalidConfig("Timeout must be ≥ 1ms".into()));
        }
        if c.max_document_bytes == 0 || c.max_image_bytes == 0 {
            return Err(FetchError::InvalidConfig(
                "Byte limits must be ≥ 1".into(),
            ));
        }
        if c.user_agent.trim().is_empty() {
            return Err(FetchError::InvalidConfig("User-Agent must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Per-request types ────────────────────────────────────────────────────

/// A `(start_index, max_count)` slice over a list (images) or a string
/// (text, counted in characters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationWindow {
    pub start_index: usize,
    pub max_count: usize,
}

impl PaginationWindow {
    /// Window over image references; `max_count` clamped to `0..=10`.
    pub fn images(start_index: usize, max_count: usize) -> Self {
        Self {
            start_index,
            max_count: max_count.min(MAX_IMAGE_COUNT),
        }
    }

    /// Window over text characters; `max_count` clamped to `1..=1_000_000`.
    pub fn text(start_index: usize, max_count: usize) -> Self {
        Self {
            start_index,
            max_count: max_count.clamp(1, MAX_TEXT_LENGTH),
        }
    }

    /// Exclusive end of the window, saturating.
    pub fn end(&self) -> usize {
        self.start_index.saturating_add(self.max_count)
    }

    /// Index range of the window intersected with a list of `len` items.
    pub fn range(&self, len: usize) -> std::ops::Range<usize> {
        let start = self.start_index.min(len);
        let end = self.end().min(len);
        start..end
    }

    /// Items past the end of the window, i.e. left for a later page.
    pub fn remaining(&self, len: usize) -> usize {
        len.saturating_sub(self.end())
    }
}

/// Which image hosts are acceptable relative to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginPolicy {
    /// Images must share scheme, host and port with the document. (default)
    #[default]
    SameOrigin,
    /// Any origin that passes SSRF validation.
    CrossOrigin,
}

/// How a composite artifact is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Base64 data URI in the output. (default)
    #[default]
    Inline,
    /// Persisted through the resource store only.
    File,
    /// Both inline and persisted.
    Both,
}

impl OutputMode {
    pub fn inline(&self) -> bool {
        matches!(self, OutputMode::Inline | OutputMode::Both)
    }

    pub fn persist(&self) -> bool {
        matches!(self, OutputMode::File | OutputMode::Both)
    }
}

/// Compositor limits, clamped to closed ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeOptions {
    /// Canvas width cap in pixels. Range: 100–10000. Default: 1000.
    pub max_width: u32,
    /// Canvas height cap in pixels. Range: 100–10000. Default: 1600.
    pub max_height: u32,
    /// Requested JPEG quality. Range: 1–100. Default: 80.
    ///
    /// The encoder additionally clamps to
    /// [`crate::pipeline::composite::MAX_JPEG_QUALITY`].
    pub quality: u8,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            max_width: 1000,
            max_height: 1600,
            quality: 80,
        }
    }
}

/// Parameters for a single [`crate::fetch::fetch`] call.
///
/// # Example
/// ```rust
/// use edgequake_webfetch::{FetchRequest, OriginPolicy};
///
/// let request = FetchRequest::builder("https://example.com/")
///     .images(true)
///     .image_window(0, 3)
///     .origin_policy(OriginPolicy::CrossOrigin)
///     .build();
/// assert_eq!(request.image_window.max_count, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Document URL.
    pub url: String,
    /// Character window over the extracted text. Default: `{0, 20000}`.
    pub text_window: PaginationWindow,
    /// Whether to acquire and composite images. Default: false.
    pub fetch_images: bool,
    /// Window over the extracted image references. Default: `{0, 3}`.
    pub image_window: PaginationWindow,
    /// Default: same-origin.
    pub origin_policy: OriginPolicy,
    /// Default: inline.
    pub output_mode: OutputMode,
    pub composite: CompositeOptions,
    /// Return the body as-is instead of extracted text. Default: false.
    pub raw: bool,
    /// Skip the robots.txt check. Default: false.
    pub ignore_robots: bool,
}

impl FetchRequest {
    pub fn builder(url: impl Into<String>) -> FetchRequestBuilder {
        FetchRequestBuilder {
            request: FetchRequest {
                url: url.into(),
                text_window: PaginationWindow::text(0, 20_000),
                fetch_images: false,
                image_window: PaginationWindow::images(0, 3),
                origin_policy: OriginPolicy::default(),
                output_mode: OutputMode::default(),
                composite: CompositeOptions::default(),
                raw: false,
                ignore_robots: false,
            },
        }
    }
}

/// Builder for [`FetchRequest`]. Every numeric setter clamps.
#[derive(Debug)]
pub struct FetchRequestBuilder {
    request: FetchRequest,
}

impl FetchRequestBuilder {
    pub fn text_window(mut self, start_index: usize, max_length: usize) -> Self {
        self.request.text_window = PaginationWindow::text(start_index, max_length);
        self
    }

    pub fn images(mut self, enabled: bool) -> Self {
        self.request.fetch_images = enabled;
        self
    }

    pub fn image_window(mut self, start_index: usize, max_count: usize) -> Self {
        self.request.image_window = PaginationWindow::images(start_index, max_count);
        self
    }

    pub fn origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.request.origin_policy = policy;
        self
    }

    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.request.output_mode = mode;
        self
    }

    pub fn max_width(mut self, px: u32) -> Self {
        self.request.composite.max_width = px.clamp(100, 10_000);
        self
    }

    pub fn max_height(mut self, px: u32) -> Self {
        self.request.composite.max_height = px.clamp(100, 10_000);
        self
    }

    pub fn quality(mut self, q: u8) -> Self {
        self.request.composite.quality = q.clamp(1, 100);
        self
    }

    pub fn raw(mut self, v: bool) -> Self {
        self.request.raw = v;
        self
    }

    pub fn ignore_robots(mut self, v: bool) -> Self {
        self.request.ignore_robots = v;
        self
    }

    pub fn build(self) -> FetchRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_safety_on() {
        let c = FetchConfig::default();
        assert!(c.ssrf_guard);
        assert_eq!(c.timeout_ms, 12_000);
        assert_eq!(c.max_redirects, 3);
        assert_eq!(c.max_document_bytes, 2_000_000);
        assert_eq!(c.max_image_bytes, 10_000_000);
        assert!(c.user_agent.starts_with(USER_AGENT_TOKEN));
    }

    #[test]
    fn env_limits_parse_and_fallback() {
        let limits = EnvLimits::from_lookup(lookup_from(&[
            ("WEBFETCH_TIMEOUT_MS", "500"),
            ("WEBFETCH_MAX_REDIRECTS", "oops"),
            ("WEBFETCH_MAX_IMAGE_BYTES", " 42 "),
        ]));
        assert_eq!(limits.timeout_ms, 500);
        assert_eq!(limits.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(limits.max_image_bytes, 42);
        assert!(limits.ssrf_guard);
    }

    #[test]
    fn env_disable_flag_requires_truthy_value() {
        let on = EnvLimits::from_lookup(lookup_from(&[("WEBFETCH_DISABLE_SSRF", "true")]));
        assert!(!on.ssrf_guard);
        let off = EnvLimits::from_lookup(lookup_from(&[("WEBFETCH_DISABLE_SSRF", "0")]));
        assert!(off.ssrf_guard);
    }

    #[test]
    fn builder_rejects_zero_limits() {
        let err = FetchConfig::builder().max_image_bytes(0).build().unwrap_err();
        assert_eq!(err.reason_code(), "invalid-config");
    }

    #[test]
    fn image_window_is_clamped() {
        let w = PaginationWindow::images(2, 50);
        assert_eq!(w.max_count, MAX_IMAGE_COUNT);
        assert_eq!(w.range(5), 2..5);
        assert_eq!(w.remaining(5), 0);
        assert_eq!(PaginationWindow::images(0, 3).remaining(5), 2);
        assert_eq!(PaginationWindow::images(9, 3).range(5), 5..5);
    }

    #[test]
    fn text_window_has_minimum_of_one() {
        assert_eq!(PaginationWindow::text(0, 0).max_count, 1);
    }

    #[test]
    fn request_builder_clamps_composite_options() {
        let r = FetchRequest::builder("https://example.com")
            .max_width(5)
            .max_height(1_000_000)
            .quality(0)
            .build();
        assert_eq!(r.composite.max_width, 100);
        assert_eq!(r.composite.max_height, 10_000);
        assert_eq!(r.composite.quality, 1);
        assert_eq!(r.origin_policy, OriginPolicy::SameOrigin);
        assert!(!r.fetch_images);
    }

    #[test]
    fn output_mode_flags() {
        assert!(OutputMode::Inline.inline() && !OutputMode::Inline.persist());
        assert!(!OutputMode::File.inline() && OutputMode::File.persist());
        assert!(OutputMode::Both.inline() && OutputMode::Both.persist());
    }
}
