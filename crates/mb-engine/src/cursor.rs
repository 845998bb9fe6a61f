// SPDX-License-Identifier: MIT OR Apache-2.0
//! Opaque pagination cursors.
//!
//! Append cursors wrap the internal rowid; listing cursors wrap an offset.
//! Both are URL-safe base64 so they survive query strings untouched.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Encode an append-log rowid cursor.
pub fn encode_rowid(rowid: u64) -> String {
    URL_SAFE_NO_PAD.encode(format!("r:{rowid}"))
}

/// Decode an append-log rowid cursor.
pub fn decode_rowid(cursor: &str) -> Option<u64> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    text.strip_prefix("r:")?.parse().ok()
}

/// Encode a listing offset cursor.
pub fn encode_offset(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("o:{offset}"))
}

/// Decode a listing offset cursor.
pub fn decode_offset(cursor: &str) -> Option<usize> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    text.strip_prefix("o:")?.parse().ok()
}
