//! Bounded redirect fetcher.
//!
//! ## Why follow redirects by hand?
//!
//! A transport that follows `Location` on its own would connect to whatever
//! the server points at, including `http://169.254.169.254/`, before we get a
//! chance to look. Redirects are therefore disabled in the client and the loop
//! lives here, as a small state machine:
//!
//! ```text
//! Attempting(hop 0) ──3xx──▶ validate Location ──▶ Attempting(hop 1) ─ … ─▶ Terminal
//!        │                        │
//!        └── timeout / error ─────┴──────────────▶ Failed
//! ```
//!
//! Every attempt gets its own deadline, and every redirect target passes the
//! full SSRF validator before the next request is issued. When validation
//! produced addresses, the attempt's client is pinned to them so the connect
//! cannot resolve somewhere else.

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::pipeline::validate::{validate, validate_url, SafetyVerdict, ValidatedUrl};
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use reqwest::Url;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

/// Hop budget and per-attempt deadline for one logical fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    /// Redirects that may be followed. `max_hops + 1` requests at most.
    pub max_hops: u32,
    /// Deadline for each attempt.
    pub timeout: Duration,
}

impl RedirectPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_hops: config.max_redirects,
            timeout: config.timeout(),
        }
    }
}

/// One request within a logical fetch. Dropped when the fetch terminates.
#[derive(Debug)]
pub struct FetchAttempt {
    pub target: ValidatedUrl,
    /// 0 for the original URL, incremented per followed redirect.
    pub hop_index: u32,
    pub deadline: Instant,
}

/// A terminal (non-3xx) response and the URL that produced it.
#[derive(Debug)]
pub struct FetchedResponse {
    pub response: reqwest::Response,
    pub final_url: Url,
    /// Redirects followed to get here.
    pub hops: u32,
}

enum HopState {
    Attempting(FetchAttempt),
    Terminal(FetchedResponse),
    Failed(FetchError),
}

/// Statuses that carry a `Location` to follow.
pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Validate `url` and fetch it, following redirects within the configured
/// budget.
///
/// Any non-redirect status, including 4xx/5xx, is returned as a terminal
/// response; judging it is the caller's business.
pub async fn fetch(
    url: &str,
    headers: &HeaderMap,
    config: &FetchConfig,
) -> Result<FetchedResponse, FetchError> {
    let target = validate_bounded(url, config.timeout(), config).await?;
    fetch_validated(target, headers, RedirectPolicy::from_config(config), config).await
}

/// Fetch a URL that has already passed validation.
///
/// Only the first attempt skips validation; every redirect target is
/// validated again.
pub async fn fetch_validated(
    target: ValidatedUrl,
    headers: &HeaderMap,
    policy: RedirectPolicy,
    config: &FetchConfig,
) -> Result<FetchedResponse, FetchError> {
    let mut state = HopState::Attempting(FetchAttempt {
        target,
        hop_index: 0,
        deadline: Instant::now() + policy.timeout,
    });

    loop {
        state = match state {
            HopState::Attempting(attempt) => step(attempt, headers, policy, config).await,
            HopState::Terminal(done) => return Ok(done),
            HopState::Failed(e) => return Err(e),
        };
    }
}

async fn step(
    attempt: FetchAttempt,
    headers: &HeaderMap,
    policy: RedirectPolicy,
    config: &FetchConfig,
) -> HopState {
    let current = attempt.target.url.clone();
    let response = match send(&attempt, headers, policy, config).await {
        Ok(r) => r,
        Err(e) => return HopState::Failed(e),
    };

    let status = response.status().as_u16();
    if !is_redirect(status) {
        debug!("HTTP {} from '{}' after {} hop(s)", status, current, attempt.hop_index);
        return HopState::Terminal(FetchedResponse {
            response,
            final_url: current,
            hops: attempt.hop_index,
        });
    }

    if attempt.hop_index >= policy.max_hops {
        return HopState::Failed(FetchError::TooManyRedirects {
            url: current.to_string(),
            max_hops: policy.max_hops,
        });
    }

    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string);
    drop(response);

    let Some(location) = location else {
        return HopState::Failed(FetchError::MissingRedirectLocation {
            url: current.to_string(),
            status,
        });
    };

    let next = match current.join(&location) {
        Ok(u) => u,
        Err(e) => {
            return HopState::Failed(FetchError::InvalidUrl {
                url: location,
                reason: e.to_string(),
            })
        }
    };
    debug!(
        "Redirect {} '{}' → '{}' (hop {}/{})",
        status,
        current,
        next,
        attempt.hop_index + 1,
        policy.max_hops
    );

    // The next attempt's clock starts here, so the lookup counts against it.
    let deadline = Instant::now() + policy.timeout;
    let verdict = match timeout_at(deadline, validate_url(next.clone(), config)).await {
        Ok(v) => v,
        Err(_) => {
            return HopState::Failed(FetchError::Timeout {
                url: next.to_string(),
                ms: policy.timeout.as_millis() as u64,
            })
        }
    };

    match verdict {
        SafetyVerdict::Allowed(target) => HopState::Attempting(FetchAttempt {
            target,
            hop_index: attempt.hop_index + 1,
            deadline,
        }),
        SafetyVerdict::Rejected(e) => HopState::Failed(e),
    }
}

/// Issue a single GET with redirects disabled and DNS pinned.
async fn send(
    attempt: &FetchAttempt,
    headers: &HeaderMap,
    policy: RedirectPolicy,
    config: &FetchConfig,
) -> Result<reqwest::Response, FetchError> {
    let target = &attempt.target;
    let url_str = target.url.to_string();

    let mut builder = reqwest::Client::builder()
        .redirect(Policy::none())
        .no_proxy()
        .user_agent(&config.user_agent);
    if let Some(host) = target.url.host_str() {
        if !target.pinned_addrs.is_empty() {
            builder = builder.resolve_to_addrs(host, &target.pinned_addrs);
        }
    }
    let client = builder
        .build()
        .map_err(|e| FetchError::Internal(format!("failed to build HTTP client: {e}")))?;

    let request = client.get(target.url.clone()).headers(headers.clone());
    match timeout_at(attempt.deadline, request.send()).await {
        Err(_) => Err(FetchError::Timeout {
            url: url_str,
            ms: policy.timeout.as_millis() as u64,
        }),
        Ok(Err(e)) if e.is_timeout() => Err(FetchError::Timeout {
            url: url_str,
            ms: policy.timeout.as_millis() as u64,
        }),
        Ok(Err(e)) => Err(FetchError::RequestFailed {
            url: url_str,
            reason: e.to_string(),
        }),
        Ok(Ok(response)) => Ok(response),
    }
}

/// Fetch and require a 2xx terminal status.
pub async fn fetch_success(
    target: ValidatedUrl,
    headers: &HeaderMap,
    policy: RedirectPolicy,
    config: &FetchConfig,
) -> Result<FetchedResponse, FetchError> {
    let fetched = fetch_validated(target, headers, policy, config).await?;
    let status = fetched.response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            url: fetched.final_url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(fetched)
}

/// Validate a URL string, giving up after `limit`.
pub(crate) async fn validate_bounded(
    url: &str,
    limit: Duration,
    config: &FetchConfig,
) -> Result<ValidatedUrl, FetchError> {
    match timeout(limit, validate(url, config)).await {
        Ok(verdict) => verdict.into_result(),
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            ms: limit.as_millis() as u64,
        }),
    }
}
