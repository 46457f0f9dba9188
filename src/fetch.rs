//! Top-level fetch entry points.
//!
//! [`fetch_document`] is the bare safe fetch: validate, follow redirects,
//! read a bounded body. [`fetch`] runs the whole request on top of it:
//! robots.txt, text extraction and pagination, then optionally the image
//! window, the composite and persistence.
//!
//! Only document-level failures are returned as `Err`. Everything that can go
//! wrong with an individual image, the composite or the store is logged and
//! reflected in the [`FetchOutput`] instead.

use crate::config::{FetchConfig, FetchRequest};
use crate::error::FetchError;
use crate::extract;
use crate::output::{CompositeSummary, FetchOutput, FetchStats, FetchedDocument, StorageLocator};
use crate::pipeline::body::read_bounded_text;
use crate::pipeline::composite::composite;
use crate::pipeline::encode::data_uri;
use crate::pipeline::images::{acquire, Acquisition};
use crate::pipeline::redirect::{fetch_success, validate_bounded, RedirectPolicy};
use crate::pipeline::validate::ValidatedUrl;
use crate::robots;
use crate::store::{batch_stamp, ResourceDraft, ResourceKind, ResourceStore};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fetch a document through the SSRF guard with bounded redirects and a
/// bounded body.
///
/// # Errors
/// Any validation, transport, status or size failure for the document.
pub async fn fetch_document(url: &str, config: &FetchConfig) -> Result<FetchedDocument, FetchError> {
    let target = validate_bounded(url, config.timeout(), config).await?;
    read_document(url, target, config).await
}

async fn read_document(
    requested: &str,
    target: ValidatedUrl,
    config: &FetchConfig,
) -> Result<FetchedDocument, FetchError> {
    let fetched = fetch_success(
        target,
        &document_headers(),
        RedirectPolicy::from_config(config),
        config,
    )
    .await?;
    let final_url = fetched.final_url.to_string();
    let hops = fetched.hops;

    let body = read_bounded_text(fetched.response, config.max_document_bytes, config.timeout()).await?;
    debug!(
        "Document '{}': {} bytes, type '{}'",
        final_url, body.byte_len, body.content_type
    );

    Ok(FetchedDocument {
        url: requested.to_string(),
        final_url,
        content_type: body.content_type,
        body: body.text,
        bytes: body.byte_len,
        hops,
    })
}

/// Run a full fetch request.
///
/// # Arguments
/// * `request` — URL, windows, origin policy, output mode, composite options
/// * `config`  — process-level limits
/// * `store`   — where `file`/`both` output goes; persistence is skipped with
///   a warning when `None`
///
/// # Errors
/// Returns `Err(FetchError)` only for failures of the document itself,
/// including a robots.txt disallow unless `request.ignore_robots` is set.
pub async fn fetch(
    request: &FetchRequest,
    config: &FetchConfig,
    store: Option<&dyn ResourceStore>,
) -> Result<FetchOutput, FetchError> {
    let total_start = Instant::now();
    info!("Fetching {}", request.url);
    if let Some(ref cb) = config.progress_callback {
        cb.on_fetch_start(&request.url);
    }

    // ── Step 1: Validate the document URL ────────────────────────────────
    let target = validate_bounded(&request.url, config.timeout(), config).await?;

    // ── Step 2: robots.txt ───────────────────────────────────────────────
    if request.ignore_robots {
        debug!("robots.txt check skipped on request");
    } else {
        robots::check(&target.url, config).await?;
    }

    // ── Step 3: Fetch the document ───────────────────────────────────────
    let document = read_document(&request.url, target, config).await?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(&document.final_url, document.bytes);
    }

    // ── Step 4: Extract and window the text ──────────────────────────────
    let text = extract::document_text(&document, request.raw);
    let window = extract::window_text(&text, request.text_window);

    // ── Step 5: Acquire images ───────────────────────────────────────────
    let mut image_references = 0;
    let acquisition = if request.fetch_images && document.is_html() {
        let document_url = Url::parse(&document.final_url).map_err(|e| FetchError::InvalidUrl {
            url: document.final_url.clone(),
            reason: e.to_string(),
        })?;
        let references = extract::extract_images(&document.body, &document_url);
        image_references = references.len();
        acquire(
            &references,
            request.image_window,
            request.origin_policy,
            &document_url,
            config,
        )
        .await
    } else {
        Acquisition::default()
    };
    let images_acquired = acquisition.buffers.len();
    let images_skipped = acquisition.skipped.len();

    // ── Step 6: Persist originals ────────────────────────────────────────
    let batch = batch_stamp();
    let persist_store = match (request.output_mode.persist(), store) {
        (true, Some(s)) => Some(s),
        (true, None) => {
            warn!("Output mode {:?} requested but no resource store configured", request.output_mode);
            None
        }
        (false, _) => None,
    };
    let mut locators: Vec<StorageLocator> = Vec::new();
    if let Some(store) = persist_store {
        for buffer in &acquisition.buffers {
            let draft = ResourceDraft {
                bytes: &buffer.bytes,
                mime_type: &buffer.content_type,
                source_url: &buffer.reference.source_url,
                index: buffer.index,
                kind: ResourceKind::Original,
                batch: &batch,
                metadata: json!({
                    "alt_text": buffer.reference.alt_text,
                    "suggested_filename": buffer.reference.suggested_filename,
                    "final_url": buffer.final_url,
                }),
            };
            if let Some(locator) = save_logged(store, draft).await {
                locators.push(locator);
            }
        }
    }

    // ── Step 7: Composite ────────────────────────────────────────────────
    let artifact = if acquisition.buffers.is_empty() {
        None
    } else {
        match composite(acquisition.buffers, request.composite, config.timeout()).await {
            Ok(a) => Some(a),
            Err(e) => {
                warn!("No composite produced: {}", e);
                None
            }
        }
    };

    // ── Step 8: Deliver the composite ────────────────────────────────────
    let mut summary = None;
    if let Some(ref artifact) = artifact {
        if let Some(store) = persist_store {
            let draft = ResourceDraft {
                bytes: &artifact.bytes,
                mime_type: &artifact.mime_type,
                source_url: &document.final_url,
                index: 0,
                kind: ResourceKind::Composite,
                batch: &batch,
                metadata: json!({
                    "width": artifact.width,
                    "height": artifact.height,
                    "images_placed": artifact.images_placed,
                }),
            };
            if let Some(locator) = save_logged(store, draft).await {
                locators.insert(0, locator);
            }
        }
        summary = Some(CompositeSummary {
            width: artifact.width,
            height: artifact.height,
            mime_type: artifact.mime_type.clone(),
            bytes: artifact.bytes.len(),
            images_placed: artifact.images_placed,
            data_uri: request.output_mode.inline().then(|| data_uri(artifact)),
        });
    }

    // ── Step 9: Assemble output ──────────────────────────────────────────
    let stats = FetchStats {
        hops: document.hops,
        document_bytes: document.bytes,
        image_references,
        images_acquired,
        images_skipped,
        robots_checked: !request.ignore_robots,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Fetch complete: {} chars, {}/{} image(s), {}ms",
        window.total_chars, images_acquired, image_references, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_fetch_complete(images_acquired);
    }

    Ok(FetchOutput {
        url: document.url,
        final_url: document.final_url,
        content_type: document.content_type,
        text: window.text,
        start_index: window.start_index,
        total_chars: window.total_chars,
        remaining_chars: window.remaining_chars,
        composite: summary,
        artifact,
        remaining_images: acquisition.remaining,
        skipped_images: acquisition.skipped,
        locators,
        stats,
    })
}

/// Synchronous wrapper around [`fetch`] without persistence.
///
/// Creates a temporary tokio runtime internally.
pub fn fetch_sync(request: &FetchRequest, config: &FetchConfig) -> Result<FetchOutput, FetchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FetchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(fetch(request, config, None))
}

async fn save_logged(store: &dyn ResourceStore, draft: ResourceDraft<'_>) -> Option<StorageLocator> {
    let kind = draft.kind;
    match store.save(draft).await {
        Ok(locator) => Some(locator),
        Err(e) => {
            warn!("Could not persist {:?} resource: {}", kind, e);
            None
        }
    }
}

fn document_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,text/plain;q=0.9,*/*;q=0.1"),
    );
    headers
}
