// SPDX-License-Identifier: MIT OR Apache-2.0
//! Strong, content-derived ETags.
//!
//! Equal content yields equal tags; distinct content yields distinct tags
//! (up to SHA-256 collisions).  Callers treat the value as opaque.

use sha2::{Digest, Sha256};

/// SHA-256 of the content as 64 lowercase hex characters.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// The quoted strong ETag for a content string.
pub fn etag_for(content: &str) -> String {
    format!("\"{}\"", content_hash(content))
}

/// Compare a client-supplied `If-Match` value against the current ETag.
///
/// Accepts the quoted form, the bare hex, and tolerates a `W/` prefix by
/// stripping it (strong comparison of the underlying value).
pub fn etag_matches(if_match: &str, current_etag: &str) -> bool {
    let normalize = |tag: &str| {
        let tag = tag.trim();
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        tag.trim_matches('"').to_string()
    };
    normalize(if_match) == normalize(current_etag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_distinct() {
        assert_eq!(etag_for("hi"), etag_for("hi"));
        assert_ne!(etag_for("hi"), etag_for("ho"));
    }

    #[test]
    fn quoted_form() {
        let tag = etag_for("content");
        assert!(tag.starts_with('"') && tag.ends_with('"'));
        assert_eq!(tag.len(), 66);
    }

    #[test]
    fn match_accepts_variants() {
        let tag = etag_for("x");
        assert!(etag_matches(&tag, &tag));
        assert!(etag_matches(tag.trim_matches('"'), &tag));
        assert!(etag_matches(&format!("W/{tag}"), &tag));
        assert!(!etag_matches(&etag_for("y"), &tag));
    }
}
