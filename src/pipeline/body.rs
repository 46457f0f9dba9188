//! Streaming capped reads: consume a response body without ever holding more
//! than `limit` bytes.
//!
//! ## Why two checks?
//!
//! `Content-Length` lets us refuse an oversized body before reading a single
//! byte, but a hostile server can omit it, understate it, or stream forever.
//! The running total is therefore checked on every chunk as well, and it is
//! the check that actually bounds memory. When it trips, the stream (and
//! with it the connection) is dropped immediately.

use crate::error::FetchError;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Streaming accumulator. `bytes_so_far` never exceeds `limit`.
#[derive(Debug)]
pub struct CappedBody {
    buf: Vec<u8>,
    limit: usize,
    content_type_hint: String,
}

impl CappedBody {
    pub fn new(limit: usize, content_type_hint: impl Into<String>) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            content_type_hint: content_type_hint.into(),
        }
    }

    /// Append a chunk, refusing it whole if it would cross the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        if chunk.len() > self.limit - self.buf.len() {
            return Err(FetchError::BodyTooLarge { limit: self.limit });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    pub fn bytes_so_far(&self) -> usize {
        self.buf.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn finish(self) -> BoundedBody {
        BoundedBody {
            bytes: self.buf,
            content_type: self.content_type_hint,
        }
    }
}

/// A fully-read body in raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedBody {
    pub bytes: Vec<u8>,
    /// `Content-Type` header value, or empty if absent.
    pub content_type: String,
}

/// A fully-read body decoded as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedText {
    pub text: String,
    pub content_type: String,
    /// Size of the undecoded body in bytes.
    pub byte_len: usize,
}

/// Read a response as raw bytes, bounded by `limit` and `timeout`.
pub async fn read_bounded(
    response: reqwest::Response,
    limit: usize,
    timeout: Duration,
) -> Result<BoundedBody, FetchError> {
    let url = response.url().to_string();
    let declared = response.content_length();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    read_capped_stream(
        response.bytes_stream(),
        declared,
        content_type,
        limit,
        timeout,
        &url,
    )
    .await
}

/// Read a response as text (lossy UTF-8), with the same cap discipline.
pub async fn read_bounded_text(
    response: reqwest::Response,
    limit: usize,
    timeout: Duration,
) -> Result<BoundedText, FetchError> {
    let body = read_bounded(response, limit, timeout).await?;
    let byte_len = body.bytes.len();
    let text = match String::from_utf8(body.bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    Ok(BoundedText {
        text,
        content_type: body.content_type,
        byte_len,
    })
}

/// Drain `stream` into a [`CappedBody`].
///
/// `declared` is the advertised length; if it is over `limit` nothing is
/// polled. The stream is dropped on every exit path, which for a reqwest body
/// closes the underlying connection.
pub async fn read_capped_stream<S, B, E>(
    stream: S,
    declared: Option<u64>,
    content_type: String,
    limit: usize,
    timeout: Duration,
    url: &str,
) -> Result<BoundedBody, FetchError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    if let Some(len) = declared {
        if len > limit as u64 {
            return Err(FetchError::DeclaredTooLarge {
                declared: len,
                limit,
            });
        }
    }

    let deadline = Instant::now() + timeout;
    let mut body = CappedBody::new(limit, content_type);
    let mut stream = Box::pin(stream);

    loop {
        let next = timeout_at(deadline, stream.next())
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                ms: timeout.as_millis() as u64,
            })?;

        match next {
            None => break,
            Some(Ok(chunk)) => {
                if let Err(e) = body.push(chunk.as_ref()) {
                    debug!(
                        "Aborting body of '{}' at {} bytes (limit {})",
                        url,
                        body.bytes_so_far(),
                        limit
                    );
                    return Err(e);
                }
            }
            Some(Err(e)) => {
                return Err(FetchError::RequestFailed {
                    url: url.to_string(),
                    reason: format!("body read failed: {e}"),
                })
            }
        }
    }

    debug!("Read {} bytes from '{}'", body.bytes_so_far(), url);
    Ok(body.finish())
}
