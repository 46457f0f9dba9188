//! Host validation: the SSRF guard every outgoing request passes through.
//!
//! ## Order of checks
//!
//! ```text
//! parse ─▶ scheme ─▶ [guard off? allow] ─▶ IP literal ─▶ local name ─▶ DNS
//! ```
//!
//! The DNS step resolves **all** A/AAAA records and rejects if any of them is
//! private. A hostname that merely *looks* public can point at
//! `169.254.169.254`, and checking only the first record would let a
//! round-robin answer slip an internal address through.
//!
//! Nothing is cached: a cached verdict is exactly what a rebinding attacker
//! wants. The addresses that passed are returned in [`ValidatedUrl`] so the
//! connection can be pinned to them (see [`crate::pipeline::redirect`]).

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::pipeline::address::classify;
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;
use url::Host;

/// DNS lookup seam.
///
/// The production implementation is [`SystemResolver`]; tests inject a
/// [`StaticResolver`] to simulate hostnames that resolve into private space.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Return every address `host` resolves to.
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo` via tokio).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Fixed host → addresses table. Unknown hosts fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.entries.insert(host.into().to_ascii_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.entries.get(host).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no entry for {host}"))
        })
    }
}

/// A URL that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    pub url: Url,
    /// Addresses that passed the DNS check, with the URL's port applied.
    ///
    /// Empty for IP literals, when the guard is off, or when resolution
    /// failed; the transport then resolves on its own.
    pub pinned_addrs: Vec<SocketAddr>,
}

/// Outcome of one validation call.
#[derive(Debug)]
pub enum SafetyVerdict {
    Allowed(ValidatedUrl),
    Rejected(FetchError),
}

impl SafetyVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SafetyVerdict::Allowed(_))
    }

    pub fn into_result(self) -> Result<ValidatedUrl, FetchError> {
        match self {
            SafetyVerdict::Allowed(v) => Ok(v),
            SafetyVerdict::Rejected(e) => Err(e),
        }
    }
}

/// Validate a raw URL string.
pub async fn validate(raw: &str, config: &FetchConfig) -> SafetyVerdict {
    let url = match Url::parse(raw.trim()) {
        Ok(u) => u,
        Err(e) => {
            return SafetyVerdict::Rejected(FetchError::InvalidUrl {
                url: raw.to_string(),
                reason: e.to_string(),
            })
        }
    };
    validate_url(url, config).await
}

/// Validate an already-parsed URL (redirect targets, image references).
pub async fn validate_url(url: Url, config: &FetchConfig) -> SafetyVerdict {
    match check(url, config).await {
        Ok(v) => SafetyVerdict::Allowed(v),
        Err(e) => {
            debug!("Rejected URL: {} ({})", e, e.reason_code());
            SafetyVerdict::Rejected(e)
        }
    }
}

enum HostKind {
    Literal(IpAddr),
    Domain(String),
}

async fn check(url: Url, config: &FetchConfig) -> Result<ValidatedUrl, FetchError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FetchError::SchemeNotAllowed {
                url: url.to_string(),
                scheme: other.to_string(),
            })
        }
    }

    let host = match url.host() {
        None => {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "URL has no host".to_string(),
            })
        }
        Some(Host::Ipv4(ip)) => HostKind::Literal(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => HostKind::Literal(IpAddr::V6(ip)),
        Some(Host::Domain(name)) => {
            HostKind::Domain(name.trim_end_matches('.').to_ascii_lowercase())
        }
    };

    if !config.ssrf_guard {
        return Ok(ValidatedUrl {
            url,
            pinned_addrs: Vec::new(),
        });
    }

    let domain = match host {
        HostKind::Literal(ip) => return check_literal(url, ip),
        HostKind::Domain(name) => name,
    };

    if is_local_hostname(&domain) {
        return Err(FetchError::LocalHostname { host: domain });
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let resolved = match config.resolver.resolve(&domain, port).await {
        Ok(addrs) => addrs,
        Err(e) => {
            // Not a rejection: the connect attempt will fail on its own.
            debug!("DNS lookup for '{}' failed: {}", domain, e);
            Vec::new()
        }
    };

    if let Some(bad) = resolved.iter().find(|ip| classify(**ip).is_private()) {
        return Err(FetchError::AddressPrivate {
            host: domain,
            addr: *bad,
            via_dns: true,
        });
    }

    Ok(ValidatedUrl {
        url,
        pinned_addrs: resolved
            .into_iter()
            .map(|ip| SocketAddr::new(ip, port))
            .collect(),
    })
}

fn check_literal(url: Url, ip: IpAddr) -> Result<ValidatedUrl, FetchError> {
    if classify(ip).is_private() {
        return Err(FetchError::AddressPrivate {
            host: ip.to_string(),
            addr: ip,
            via_dns: false,
        });
    }
    Ok(ValidatedUrl {
        url,
        pinned_addrs: Vec::new(),
    })
}

/// `localhost`, `*.localhost`, `local`, `*.local`. Expects a lowercase name.
pub fn is_local_hostname(host: &str) -> bool {
    host == "localhost"
        || host.ends_with(".localhost")
        || host == "local"
        || host.ends_with(".local")
}
