//! Inline encoding: `CompositeArtifact` → `data:` URI.
//!
//! Agent-facing protocols carry images inside JSON, so the `inline` output
//! mode wraps the encoded JPEG as a base64 data URI. No re-encoding happens
//! here: the compositor already produced the final bytes.

use crate::output::CompositeArtifact;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Wrap an artifact as `data:<mime>;base64,<payload>`.
pub fn data_uri(artifact: &CompositeArtifact) -> String {
    let b64 = STANDARD.encode(&artifact.bytes);
    debug!("Encoded composite → {} bytes base64", b64.len());
    format!("data:{};base64,{}", artifact.mime_type, b64)
}

/// Split a base64 data URI into `(mime, bytes)`. `None` for anything else.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let bytes = STANDARD.decode(payload).ok()?;
    Some((mime.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::tiny_jpeg;

    #[test]
    fn data_uri_wraps_artifact_bytes() {
        let artifact = CompositeArtifact {
            bytes: tiny_jpeg(),
            width: 1,
            height: 1,
            mime_type: "image/jpeg".into(),
            images_placed: 1,
        };
        let uri = data_uri(&artifact);
        assert!(uri.starts_with("data:image/jpeg;base64,/9j/"));
        let (mime, bytes) = decode_data_uri(&uri).expect("valid data URI");
        assert_eq!(mime, "image/jpeg");
        assert_eq!(bytes, artifact.bytes);
    }

    #[test]
    fn non_base64_uris_are_refused() {
        assert!(decode_data_uri("data:text/plain,hello").is_none());
        assert!(decode_data_uri("https://example.com/a.png").is_none());
    }
}
