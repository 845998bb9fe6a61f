// SPDX-License-Identifier: MIT OR Apache-2.0
//! Path validation and normalization for capability-scoped workspaces.
//!
//! Client paths arrive as raw URL fragments.  Validation runs against **both**
//! the raw and the percent-decoded form so double-encoding cannot smuggle a
//! traversal or control byte past the checks; decoding happens exactly once.
//!
//! Canonical file paths have a leading `/`, no trailing `/` (except the
//! root), and no empty segments.  Folder paths canonically carry exactly one
//! trailing `/`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use percent_encoding::percent_decode_str;

/// Maximum accepted path length, raw or decoded, in bytes.
pub const MAX_PATH_BYTES: usize = 1024;

/// Maximum length of a single decoded segment, in bytes.
pub const MAX_SEGMENT_BYTES: usize = 255;

/// Why a path was rejected.  All variants surface as `INVALID_PATH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Raw or decoded form exceeds [`MAX_PATH_BYTES`].
    #[error("path exceeds {MAX_PATH_BYTES} bytes")]
    TooLong,
    /// A decoded segment exceeds [`MAX_SEGMENT_BYTES`].
    #[error("path segment exceeds {MAX_SEGMENT_BYTES} bytes")]
    SegmentTooLong,
    /// NUL, CR, or LF present, raw or encoded.
    #[error("path contains control bytes")]
    ControlBytes,
    /// `..` present, raw or decoded.
    #[error("path contains a traversal sequence")]
    Traversal,
    /// Malformed percent-encoding or non-UTF-8 decode result.
    #[error("path has invalid percent-encoding")]
    BadEncoding,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a raw client path and return its normalized form.
///
/// Percent-decoding is performed exactly once; every check runs against the
/// raw form first and the decoded form second.
pub fn validate_and_normalize(raw: &str) -> Result<String, PathError> {
    if raw.len() > MAX_PATH_BYTES {
        return Err(PathError::TooLong);
    }
    screen_control_bytes(raw)?;
    if raw.contains("..") {
        return Err(PathError::Traversal);
    }
    check_percent_syntax(raw)?;

    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| PathError::BadEncoding)?;

    if decoded.len() > MAX_PATH_BYTES {
        return Err(PathError::TooLong);
    }
    // The decoded form is screened for encoded sequences too: a second
    // decode elsewhere must not be able to materialise a traversal or
    // control byte (double-encoding bypass).
    screen_control_bytes(&decoded)?;
    if decoded.contains("..") || decoded.to_ascii_lowercase().contains("%2e%2e") {
        return Err(PathError::Traversal);
    }
    for segment in decoded.split('/') {
        if segment.len() > MAX_SEGMENT_BYTES {
            return Err(PathError::SegmentTooLong);
        }
    }

    Ok(normalize(&decoded))
}

/// Reject raw NUL/CR/LF and their percent-encoded forms (case-insensitive).
fn screen_control_bytes(raw: &str) -> Result<(), PathError> {
    if raw.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(PathError::ControlBytes);
    }
    let lower = raw.to_ascii_lowercase();
    if lower.contains("%00") || lower.contains("%0d") || lower.contains("%0a") {
        return Err(PathError::ControlBytes);
    }
    Ok(())
}

/// Every `%` must be followed by two hex digits.
fn check_percent_syntax(raw: &str) -> Result<(), PathError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let ok = i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !ok {
                return Err(PathError::BadEncoding);
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Screen a raw URL (before any routing) for traversal sequences.
///
/// Catches `..` plus its single-encoded forms; double-encoded forms are
/// caught later by [`validate_and_normalize`] after the single decode.
pub fn raw_url_has_traversal(raw_url: &str) -> bool {
    if raw_url.contains("..") {
        return true;
    }
    raw_url.to_ascii_lowercase().contains("%2e%2e")
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize an already-decoded path: collapse consecutive `/`, ensure a
/// leading `/`, drop the trailing `/` (except for the root).
///
/// Idempotent: `normalize(normalize(p)) == normalize(p)`.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Normalize to folder form: exactly one trailing `/`.
pub fn normalize_folder(path: &str) -> String {
    let mut out = normalize(path);
    if out != "/" {
        out.push('/');
    }
    out
}

// ---------------------------------------------------------------------------
// Scope containment
// ---------------------------------------------------------------------------

/// Whether `path` (canonical file form) lies within the folder `scope`.
///
/// Containment is segment-based: a path is inside `/docs/` iff it equals
/// `/docs` or starts with `/docs/`.  A plain prefix check would wrongly
/// admit `/docs-backup/readme.md`.
pub fn scope_contains(scope: &str, path: &str) -> bool {
    let scope = normalize(scope);
    if scope == "/" {
        return true;
    }
    let path = normalize(path);
    if path == scope {
        return true;
    }
    let mut with_slash = scope;
    with_slash.push('/');
    path.starts_with(&with_slash)
}

// ---------------------------------------------------------------------------
// Path arithmetic
// ---------------------------------------------------------------------------

/// Parent folder of a canonical path (`/a/b.md` → `/a`, `/x` → `/`).
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Final segment of a canonical path (`/a/b.md` → `b.md`, `/` → empty).
pub fn file_name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a parent folder and a name into a canonical path.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", normalize(parent))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
