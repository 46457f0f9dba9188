//! # edgequake-webfetch
//!
//! Fetch attacker-influenced URLs on behalf of an agent without becoming an
//! SSRF proxy, a memory sink or a redirect-loop victim.
//!
//! ## Why this crate?
//!
//! An agent that can "read this link" can be pointed at
//! `http://169.254.169.254/`, at a hostname that resolves to `10.0.0.5`, at a
//! redirect chain that never ends, or at a server that streams gigabytes.
//! A plain HTTP client follows all of these happily. This crate puts every
//! request, including each redirect hop and each image, through the same
//! guard: private-address and local-name checks over **all** DNS records,
//! connections pinned to the addresses that passed, a hop budget, per-attempt
//! deadlines and byte caps enforced while streaming.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Validate  scheme, IP literal, local name, every DNS record
//!  ├─ 2. Robots    robots.txt via the same safe fetch (fail-open)
//!  ├─ 3. Fetch     manual redirects, each hop re-validated, capped body
//!  ├─ 4. Extract   readable text + <img> references, char window
//!  ├─ 5. Images    sequential, same-origin by default, capped bodies
//!  ├─ 6. Stack     vertical composite → JPEG (spawn_blocking)
//!  └─ 7. Output    inline data URI and/or persisted resources
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_webfetch::{fetch, FetchConfig, FetchRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Limits from WEBFETCH_* environment variables, safety on by default.
//!     let config = FetchConfig::from_env().build()?;
//!     let request = FetchRequest::builder("https://example.com/")
//!         .images(true)
//!         .image_window(0, 3)
//!         .build();
//!     let output = fetch(&request, &config, None).await?;
//!     println!("{}", output.text);
//!     eprintln!("{} image(s), {} more", output.stats.images_acquired, output.remaining_images);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `webfetch` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-webfetch = { version = "0.1", default-features = false }
//! ```
//!
//! ## Environment
//!
//! | Variable | Default | Effect |
//! |----------|---------|--------|
//! | `WEBFETCH_TIMEOUT_MS` | 12000 | per-operation timeout |
//! | `WEBFETCH_MAX_REDIRECTS` | 3 | redirect hop budget |
//! | `WEBFETCH_MAX_HTML_BYTES` | 2000000 | document body cap |
//! | `WEBFETCH_MAX_IMAGE_BYTES` | 10000000 | single-image body cap |
//! | `WEBFETCH_DISABLE_SSRF` | unset | **test only**: disables address checks |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod robots;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CompositeOptions, FetchConfig, FetchConfigBuilder, FetchRequest, FetchRequestBuilder,
    OriginPolicy, OutputMode, PaginationWindow,
};
pub use error::{FetchError, SkippedImage};
pub use fetch::{fetch, fetch_document, fetch_sync};
pub use output::{
    CompositeArtifact, CompositeSummary, FetchOutput, FetchStats, FetchedDocument, ImageBuffer,
    ImageReference, StorageLocator,
};
pub use pipeline::validate::{HostResolver, SafetyVerdict, StaticResolver, SystemResolver};
pub use progress::{FetchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{FileResourceStore, ResourceEntry, ResourceStore};
