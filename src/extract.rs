//! Document extraction: readable text and `<img>` references from HTML.
//!
//! ## Why regex and not a DOM?
//!
//! The fetched markup is untrusted and only two things are needed from it:
//! roughly readable text and the list of images in document order. A handful
//! of deterministic regex passes does both without building a tree, and each
//! pass is a pure `&str → String` function that can be tested on its own.
//! Article-extraction quality is not a goal.
//!
//! ## Pass order (text)
//!
//! Drop invisible elements before tags are touched, turn block boundaries into
//! newlines before the remaining tags are stripped, and decode entities last so
//! that `&lt;script&gt;` in the page text never looks like markup.

use crate::config::PaginationWindow;
use crate::output::{FetchedDocument, ImageReference};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

// ── Images ───────────────────────────────────────────────────────────────

static RE_IMG_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static RE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\b(src|alt)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

/// Every `<img src>` in document order, resolved against `base`.
///
/// `data:` URIs, empty sources and unresolvable sources are skipped. A URL
/// seen twice is kept once, at its first position.
pub fn extract_images(html: &str, base: &Url) -> Vec<ImageReference> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for tag in RE_IMG_TAG.find_iter(html) {
        let mut src = None;
        let mut alt = String::new();
        for caps in RE_ATTR.captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or("");
            match caps[1].to_ascii_lowercase().as_str() {
                "src" if src.is_none() => src = Some(decode_entities(value.trim())),
                "alt" => alt = normalise_inline(&decode_entities(value)),
                _ => {}
            }
        }

        let Some(src) = src.filter(|s| !s.is_empty()) else {
            continue;
        };
        if src.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
            continue;
        }
        let url = match base.join(&src) {
            Ok(u) => u,
            Err(e) => {
                debug!("Ignoring unresolvable image src '{}': {}", src, e);
                continue;
            }
        };
        if !seen.insert(url.to_string()) {
            continue;
        }
        refs.push(ImageReference {
            suggested_filename: suggested_filename(&url),
            source_url: url.to_string(),
            alt_text: alt,
        });
    }

    debug!("Extracted {} image reference(s)", refs.len());
    refs
}

/// Last non-empty path segment, or `image`.
pub fn suggested_filename(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| !last.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "image".to_string())
}

// ── Text ─────────────────────────────────────────────────────────────────

/// Text for a fetched document: the body as-is when `raw` or not HTML,
/// otherwise [`html_to_text`].
pub fn document_text(document: &FetchedDocument, raw: bool) -> String {
    if raw || !document.is_html() {
        document.body.clone()
    } else {
        html_to_text(&document.body)
    }
}

/// Convert HTML into plain text with light markdown structure.
pub fn html_to_text(html: &str) -> String {
    let title = extract_title(html);
    let s = strip_invisible(html);
    let s = mark_headings(&s);
    let s = mark_list_items(&s);
    let s = mark_blocks(&s);
    let s = strip_tags(&s);
    let s = decode_entities(&s);
    let body = tidy_whitespace(&s);

    match title {
        Some(t) if !body.starts_with(&format!("# {t}")) => format!("# {t}\n\n{body}"),
        _ => body,
    }
}

static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

fn extract_title(html: &str) -> Option<String> {
    let raw = RE_TITLE.captures(html)?.get(1)?.as_str();
    let title = normalise_inline(&decode_entities(raw));
    (!title.is_empty()).then_some(title)
}

// ── Pass 1: Drop invisible elements ──────────────────────────────────────

static RE_INVISIBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<head\b[^>]*>.*?</head>|<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<noscript\b[^>]*>.*?</noscript>|<template\b[^>]*>.*?</template>|<!--.*?-->",
    )
    .unwrap()
});

fn strip_invisible(input: &str) -> String {
    RE_INVISIBLE.replace_all(input, " ").into_owned()
}

// ── Pass 2: Headings ─────────────────────────────────────────────────────

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>").unwrap());

fn mark_headings(input: &str) -> String {
    RE_HEADING
        .replace_all(input, |caps: &Captures| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("\n\n{} {}\n\n", "#".repeat(level), &caps[2])
        })
        .into_owned()
}

// ── Pass 3: List items ───────────────────────────────────────────────────

static RE_LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<li\b[^>]*>").unwrap());

fn mark_list_items(input: &str) -> String {
    RE_LIST_ITEM.replace_all(input, "\n- ").into_owned()
}

// ── Pass 4: Block boundaries ─────────────────────────────────────────────

static RE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</?(p|div|section|article|header|footer|main|nav|aside|blockquote|pre|table|tr|ul|ol|dl|dt|dd|figure|figcaption|form|hr|br)\b[^>]*>",
    )
    .unwrap()
});

fn mark_blocks(input: &str) -> String {
    RE_BLOCK.replace_all(input, "\n").into_owned()
}

// ── Pass 5: Remaining tags ───────────────────────────────────────────────

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

fn strip_tags(input: &str) -> String {
    RE_TAG.replace_all(input, " ").into_owned()
}

// ── Pass 6: Entities ─────────────────────────────────────────────────────

static RE_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());

/// Decode numeric entities and the common named ones. Unknown names are kept.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    RE_ENTITY
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(name)
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '–',
        "mdash" => '—',
        "hellip" => '…',
        "copy" => '©',
        "reg" => '®',
        "laquo" => '«',
        "raquo" => '»',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        _ => return None,
    })
}

// ── Pass 7: Whitespace ───────────────────────────────────────────────────

fn normalise_inline(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse runs of spaces per line and keep at most one blank line.
fn tidy_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut blank_run = 0;
    for line in input.lines() {
        let line = normalise_inline(line);
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = 0;
    }
    out
}

// ── Pagination ───────────────────────────────────────────────────────────

/// A character window over extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextWindow {
    pub text: String,
    pub start_index: usize,
    pub total_chars: usize,
    pub remaining_chars: usize,
}

/// Slice `text` by characters (not bytes), so the cut never splits a
/// code point.
pub fn window_text(text: &str, window: PaginationWindow) -> TextWindow {
    let total_chars = text.chars().count();
    let range = window.range(total_chars);
    let slice: String = text
        .chars()
        .skip(range.start)
        .take(range.end - range.start)
        .collect();
    TextWindow {
        text: slice,
        start_index: window.start_index,
        total_chars,
        remaining_chars: window.remaining(total_chars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/blog/post.html").unwrap()
    }

    #[test]
    fn images_resolved_in_document_order() {
        let html = r#"
            <p><IMG SRC="/img/a.png" alt="First &amp; best"></p>
            <img alt='second' src='b.jpg'>
            <img src=https://cdn.example.net/c.gif>
        "#;
        let refs = extract_images(html, &base());
        let urls: Vec<&str> = refs.iter().map(|r| r.source_url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://example.com/img/a.png",
                "https://example.com/blog/b.jpg",
                "https://cdn.example.net/c.gif"
            ]
        );
        assert_eq!(refs[0].alt_text, "First & best");
        assert_eq!(refs[1].alt_text, "second");
        assert_eq!(refs[2].suggested_filename, "c.gif");
    }

    #[test]
    fn data_uris_empty_and_duplicate_sources_are_skipped() {
        let html = r#"
            <img src="data:image/png;base64,AAAA">
            <img src="">
            <img alt="no src">
            <img src="/x.png"><img src="https://example.com/x.png">
        "#;
        let refs = extract_images(html, &base());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].source_url, "https://example.com/x.png");
    }

    #[test]
    fn filename_falls_back_for_bare_paths() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(suggested_filename(&url), "image");
        let url = Url::parse("https://example.com/a/photo.webp?w=200").unwrap();
        assert_eq!(suggested_filename(&url), "photo.webp");
    }

    #[test]
    fn html_to_text_keeps_structure() {
        let html = r#"<html><head><title>My &quot;Page&quot;</title>
            <style>body { color: red }</style></head>
            <body><script>alert('x')</script>
            <h2>Section</h2><p>Hello   <b>world</b> &#8212; ok</p>
            <ul><li>one</li><li>two</li></ul>
            <!-- hidden --></body></html>"#;
        let text = html_to_text(html);
        assert_eq!(
            text,
            "# My \"Page\"\n\n## Section\n\nHello world — ok\n\n- one\n- two"
        );
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn entity_decoding() {
        assert_eq!(decode_entities("a &lt;b&gt; &#x41;&#66; &bogus;"), "a <b> AB &bogus;");
        assert_eq!(decode_entities("no entities"), "no entities");
    }

    #[test]
    fn non_html_and_raw_pass_through() {
        let doc = FetchedDocument {
            url: "https://example.com/a.txt".into(),
            final_url: "https://example.com/a.txt".into(),
            content_type: "text/plain".into(),
            body: "<b>literal</b>".into(),
            bytes: 14,
            hops: 0,
        };
        assert_eq!(document_text(&doc, false), "<b>literal</b>");
        let html = FetchedDocument {
            content_type: "text/html".into(),
            ..doc
        };
        assert_eq!(document_text(&html, true), "<b>literal</b>");
        assert_eq!(document_text(&html, false), "literal");
    }

    #[test]
    fn text_window_counts_characters() {
        let text = "héllo wörld";
        let w = window_text(text, PaginationWindow::text(1, 4));
        assert_eq!(w.text, "éllo");
        assert_eq!(w.total_chars, 11);
        assert_eq!(w.remaining_chars, 6);

        let past = window_text(text, PaginationWindow::text(50, 10));
        assert_eq!(past.text, "");
        assert_eq!(past.remaining_chars, 0);
    }
}
