// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability key codec: generation, pattern validation, hashing, and
//! constant-time comparison.
//!
//! Keys are bearer tokens embedded in URL paths.  Three shapes exist:
//!
//! * **root** — bare base62, minimum 22 characters (`^[A-Za-z0-9]{22,}$`);
//! * **scoped** — `r_` / `a_` / `w_` prefix plus 20+ base62
//!   (`^(r|a|w)_[A-Za-z0-9]{20,}$`);
//! * **API** — `sk_live_` / `sk_test_` plus 20+ base62
//!   (`^sk_(live|test)_[A-Za-z0-9]{20,}$`).
//!
//! Plaintext keys are never persisted; the store holds the SHA-256 hash and
//! a 4-character human prefix only.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Minimum length of a generated key body.
pub const MIN_KEY_LEN: usize = 22;

/// Minimum length of the base62 suffix on prefixed keys.
pub const MIN_SUFFIX_LEN: usize = 20;

/// Number of plaintext characters retained as a human-readable prefix.
pub const PREFIX_LEN: usize = 4;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Generate a random base62 key of `len` characters.
///
/// Draws cryptographically secure bytes and maps each byte modulo 62 into
/// `A–Z a–z 0–9`.  Requests below [`MIN_KEY_LEN`] are clamped up; callers may
/// request longer keys but never shorter ones.
pub fn generate_key(len: usize) -> String {
    let len = len.max(MIN_KEY_LEN);
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect()
}

/// Permission prefix of a scoped capability token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopedPrefix {
    /// `r_` — read.
    Read,
    /// `a_` — append.
    Append,
    /// `w_` — write.
    Write,
}

impl ScopedPrefix {
    /// The literal prefix including the underscore.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "r_",
            Self::Append => "a_",
            Self::Write => "w_",
        }
    }
}

/// Generate a scoped token: prefix plus a fresh [`MIN_KEY_LEN`]-character body.
pub fn generate_scoped_key(prefix: ScopedPrefix) -> String {
    format!("{}{}", prefix.as_str(), generate_key(MIN_KEY_LEN))
}

/// Generate an API token (`sk_live_…` or `sk_test_…`).
pub fn generate_api_key(live: bool) -> String {
    let env = if live { "live" } else { "test" };
    format!("sk_{env}_{}", generate_key(MIN_KEY_LEN))
}

// ---------------------------------------------------------------------------
// Pattern validation
// ---------------------------------------------------------------------------

fn is_base62(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// `^[A-Za-z0-9]{22,}$`
pub fn is_valid_root_key(key: &str) -> bool {
    key.len() >= MIN_KEY_LEN && is_base62(key)
}

/// `^(r|a|w)_[A-Za-z0-9]{20,}$`
pub fn is_valid_scoped_key(key: &str) -> bool {
    let Some((prefix, suffix)) = key.split_once('_') else {
        return false;
    };
    matches!(prefix, "r" | "a" | "w") && suffix.len() >= MIN_SUFFIX_LEN && is_base62(suffix)
}

/// `^sk_(live|test)_[A-Za-z0-9]{20,}$`
pub fn is_valid_api_key(key: &str) -> bool {
    let Some(rest) = key.strip_prefix("sk_") else {
        return false;
    };
    let Some((env, suffix)) = rest.split_once('_') else {
        return false;
    };
    matches!(env, "live" | "test") && suffix.len() >= MIN_SUFFIX_LEN && is_base62(suffix)
}

/// A key valid on the capability URL surface (root or scoped).
pub fn is_valid_capability_key(key: &str) -> bool {
    is_valid_root_key(key) || is_valid_scoped_key(key)
}

/// The scoped prefix of a key, if it carries one.
pub fn scoped_prefix_of(key: &str) -> Option<ScopedPrefix> {
    if !is_valid_scoped_key(key) {
        return None;
    }
    match key.as_bytes()[0] {
        b'r' => Some(ScopedPrefix::Read),
        b'a' => Some(ScopedPrefix::Append),
        b'w' => Some(ScopedPrefix::Write),
        _ => None,
    }
}

/// The 4-character human prefix retained alongside the hash.
pub fn key_prefix(key: &str) -> String {
    key.chars().take(PREFIX_LEN).collect()
}

// ---------------------------------------------------------------------------
// Hashing & comparison
// ---------------------------------------------------------------------------

/// SHA-256 of the plaintext, as 64 lowercase hex characters.
pub fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Constant-time string equality.
///
/// Accumulates differences via bitwise OR and always iterates the longer
/// input, so runtime does not short-circuit on the first mismatch and does
/// not reveal the common-prefix length.
pub fn secure_compare(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len = a.len().max(b.len());
    let mut diff: u8 = (a.len() != b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::time::Instant;

    #[test]
    fn generated_length_honours_request() {
        for n in [22usize, 23, 32, 64] {
            assert_eq!(generate_key(n).len(), n);
        }
    }

    #[test]
    fn short_requests_clamp_to_minimum() {
        for n in [0usize, 1, 10, 21] {
            assert_eq!(generate_key(n).len(), MIN_KEY_LEN);
        }
    }

    #[test]
    fn generated_keys_are_base62() {
        let key = generate_key(100);
        assert!(key.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn thousand_generations_are_distinct() {
        let keys: HashSet<String> = (0..1000).map(|_| generate_key(MIN_KEY_LEN)).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn scoped_and_api_keys_validate() {
        assert!(is_valid_scoped_key(&generate_scoped_key(ScopedPrefix::Read)));
        assert!(is_valid_scoped_key(&generate_scoped_key(ScopedPrefix::Append)));
        assert!(is_valid_scoped_key(&generate_scoped_key(ScopedPrefix::Write)));
        assert!(is_valid_api_key(&generate_api_key(true)));
        assert!(is_valid_api_key(&generate_api_key(false)));
    }

    #[test]
    fn root_pattern_rejections() {
        assert!(!is_valid_root_key(""));
        assert!(!is_valid_root_key("short"));
        assert!(!is_valid_root_key("has-a-dash-but-long-enough"));
        assert!(!is_valid_root_key(&"x".repeat(21)));
        assert!(is_valid_root_key(&"x".repeat(22)));
    }

    #[test]
    fn scoped_pattern_rejections() {
        assert!(!is_valid_scoped_key("x_aaaaaaaaaaaaaaaaaaaa"));
        assert!(!is_valid_scoped_key("r_short"));
        assert!(!is_valid_scoped_key("r-aaaaaaaaaaaaaaaaaaaa"));
        assert!(is_valid_scoped_key("r_aaaaaaaaaaaaaaaaaaaa"));
        assert!(is_valid_scoped_key("w_AAAAAAAAAAAAAAAAAAAA99"));
    }

    #[test]
    fn api_pattern_rejections() {
        assert!(!is_valid_api_key("sk_prod_aaaaaaaaaaaaaaaaaaaa"));
        assert!(!is_valid_api_key("sk_live_short"));
        assert!(!is_valid_api_key("pk_live_aaaaaaaaaaaaaaaaaaaa"));
        assert!(is_valid_api_key("sk_live_aaaaaaaaaaaaaaaaaaaa"));
        assert!(is_valid_api_key("sk_test_aaaaaaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn scoped_prefix_classification() {
        assert_eq!(
            scoped_prefix_of("r_aaaaaaaaaaaaaaaaaaaa"),
            Some(ScopedPrefix::Read)
        );
        assert_eq!(
            scoped_prefix_of("a_aaaaaaaaaaaaaaaaaaaa"),
            Some(ScopedPrefix::Append)
        );
        assert_eq!(
            scoped_prefix_of("w_aaaaaaaaaaaaaaaaaaaa"),
            Some(ScopedPrefix::Write)
        );
        assert_eq!(scoped_prefix_of("not-a-key"), None);
    }

    #[test]
    fn prefix_is_first_four_chars() {
        assert_eq!(key_prefix("abcdefgh"), "abcd");
        assert_eq!(key_prefix("r_xyz"), "r_xy");
    }

    #[test]
    fn hash_is_deterministic_hex() {
        let h1 = hash_key("some-key");
        let h2 = hash_key("some-key");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(hash_key("other-key"), h1);
    }

    #[test]
    fn secure_compare_semantics() {
        assert!(secure_compare("abc", "abc"));
        assert!(!secure_compare("abc", "abd"));
        assert!(!secure_compare("abc", "ab"));
        assert!(!secure_compare("", "a"));
        assert!(secure_compare("", ""));
    }

    #[test]
    fn secure_compare_timing_band() {
        // Near-match vs early-mismatch must stay within a 3x band over
        // 10 000 iterations.  Generous bound; this is a smoke check, not a
        // microbenchmark.
        let base = "k".repeat(64);
        let near = format!("{}x", &base[..63]);
        let far = format!("x{}", &base[..63]);

        let time = |other: &str| {
            let start = Instant::now();
            for _ in 0..10_000 {
                std::hint::black_box(secure_compare(&base, other));
            }
            start.elapsed().as_nanos().max(1)
        };

        // Warm up before measuring.
        time(&near);
        let t_near = time(&near);
        let t_far = time(&far);
        let ratio = t_near.max(t_far) as f64 / t_near.min(t_far) as f64;
        assert!(ratio < 3.0, "timing ratio {ratio} exceeds 3x");
    }

    proptest! {
        #[test]
        fn prop_generated_keys_validate(len in 0usize..128) {
            let key = generate_key(len);
            prop_assert!(is_valid_root_key(&key));
            prop_assert!(key.len() == len.max(MIN_KEY_LEN));
        }

        #[test]
        fn prop_hash_stable_and_sized(s in ".*") {
            let h = hash_key(&s);
            prop_assert_eq!(h.len(), 64);
            prop_assert_eq!(h, hash_key(&s));
        }

        #[test]
        fn prop_secure_compare_matches_eq(a in "[a-z]{0,40}", b in "[a-z]{0,40}") {
            prop_assert_eq!(secure_compare(&a, &b), a == b);
        }
    }
}
