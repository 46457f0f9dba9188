//! robots.txt policy for the primary document.
//!
//! The policy file is retrieved through the same validated, bounded fetch as
//! everything else, so a hostile site cannot use its robots.txt to redirect
//! us into private address space or feed us an unbounded body.
//!
//! Only an explicit `Disallow` blocks a fetch. A missing file, an error
//! status, a timeout or any other retrieval failure leaves the fetch
//! unblocked: availability must not hinge on a third-party policy file.
//!
//! Matching follows the common crawler conventions: the group naming our
//! product token wins over `*`, the longest matching rule decides, a tie goes
//! to `Allow`, and `*` / `$` are honoured inside patterns.

use crate::config::{FetchConfig, USER_AGENT_TOKEN};
use crate::error::FetchError;
use crate::pipeline::body::read_bounded_text;
use crate::pipeline::redirect;
use reqwest::header::HeaderMap;
use reqwest::Url;
use tracing::{debug, info};

/// Largest robots.txt we are willing to read.
pub const ROBOTS_MAX_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

/// The rules that apply to one user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    rules: Vec<Rule>,
}

#[derive(Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

impl RobotsRules {
    /// Parse `body` and keep the rules for `agent_token`, falling back to `*`.
    pub fn parse(body: &str, agent_token: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut last_was_agent = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !last_was_agent || groups.is_empty() {
                        groups.push(Group::default());
                    }
                    if let Some(g) = groups.last_mut() {
                        g.agents.push(value.to_ascii_lowercase());
                    }
                    last_was_agent = true;
                }
                "allow" | "disallow" => {
                    last_was_agent = false;
                    // An empty Disallow allows everything; it adds nothing.
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(g) = groups.last_mut() {
                        g.rules.push(Rule {
                            allow: key == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                _ => last_was_agent = false,
            }
        }

        let token = agent_token.to_ascii_lowercase();
        let pick = |name: &str| -> Vec<Rule> {
            groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == name))
                .flat_map(|g| g.rules.iter().cloned())
                .collect()
        };
        let mut rules = pick(&token);
        if rules.is_empty() && !groups.iter().any(|g| g.agents.iter().any(|a| *a == token)) {
            rules = pick("*");
        }
        Self { rules }
    }

    /// Whether `path` (path plus optional `?query`) may be fetched.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.chars().count();
            best = match best {
                None => Some((len, rule.allow)),
                Some((best_len, _)) if len > best_len => Some((len, rule.allow)),
                Some((best_len, best_allow)) if len == best_len => {
                    Some((len, best_allow || rule.allow))
                }
                keep => keep,
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

/// `*` matches any run of characters; a trailing `$` anchors the end.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    if parts.is_empty() {
        return !anchored || rest.is_empty();
    }
    for (i, part) in parts.iter().enumerate() {
        if anchored && i + 1 == parts.len() {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

/// Fail with [`FetchError::RobotsDisallowed`] if the site's robots.txt
/// forbids `url` for our user agent. Every other outcome is `Ok`.
pub async fn check(url: &Url, config: &FetchConfig) -> Result<(), FetchError> {
    let origin = url.origin().ascii_serialization();
    let robots_url = match url.join("/robots.txt") {
        Ok(u) => u,
        Err(_) => return Ok(()),
    };

    let rules = match fetch_rules(&robots_url, config).await {
        Some(r) => r,
        None => return Ok(()),
    };

    let mut path = url.path().to_string();
    if let Some(q) = url.query() {
        path.push('?');
        path.push_str(q);
    }
    if rules.is_allowed(&path) {
        debug!("robots.txt allows '{}'", path);
        Ok(())
    } else {
        info!("robots.txt on {} disallows '{}'", origin, path);
        Err(FetchError::RobotsDisallowed {
            url: url.to_string(),
            origin,
        })
    }
}

async fn fetch_rules(robots_url: &Url, config: &FetchConfig) -> Option<RobotsRules> {
    let fetched = match redirect::fetch(robots_url.as_str(), &HeaderMap::new(), config).await {
        Ok(f) => f,
        Err(e) => {
            debug!("robots.txt unavailable at '{}': {} (allowing)", robots_url, e);
            return None;
        }
    };
    if !fetched.response.status().is_success() {
        debug!(
            "robots.txt at '{}' returned HTTP {} (allowing)",
            robots_url,
            fetched.response.status()
        );
        return None;
    }
    match read_bounded_text(fetched.response, ROBOTS_MAX_BYTES, config.timeout()).await {
        Ok(body) => Some(RobotsRules::parse(&body.text, USER_AGENT_TOKEN)),
        Err(e) => {
            debug!("robots.txt body unreadable: {} (allowing)", e);
            None
        }
    }
}
