// SPDX-License-Identifier: MIT OR Apache-2.0
//! Originating-client-IP resolution under a proxy-trust policy.
//!
//! `CF-Connecting-IP` is preferred regardless of proxy trust because it is
//! enforced by the upstream edge.  `X-Forwarded-For` is only consulted when
//! proxy headers are trusted, optionally gated behind a shared secret carried
//! in a configurable header.

/// Sentinel returned when no trustworthy client IP can be derived.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// How much to trust proxy-supplied headers.
#[derive(Debug, Clone, Default)]
pub struct ProxyTrustPolicy {
    /// Consult `X-Forwarded-For` at all.
    pub trust_proxy_headers: bool,
    /// Accept a single-element `X-Forwarded-For` list.  Multi-element lists
    /// are always acceptable under `trust_proxy_headers` because the last
    /// hop was appended by our own proxy.
    pub trust_single_x_forwarded_for: bool,
    /// Header that must carry the shared secret, if configured.
    pub trusted_proxy_secret_header: Option<String>,
    /// The shared secret value.
    pub trusted_proxy_secret: Option<String>,
}

/// Resolve the originating client IP from request headers.
///
/// `header` is a case-insensitive lookup into the request's headers (the
/// HTTP layer supplies it); returns the resolved IP string or
/// [`UNKNOWN_CLIENT`].
pub fn resolve_client_ip<F>(header: F, policy: &ProxyTrustPolicy) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(cf) = header("cf-connecting-ip") {
        let cf = cf.trim();
        if !cf.is_empty() {
            return cf.to_string();
        }
    }

    if !policy.trust_proxy_headers {
        return UNKNOWN_CLIENT.to_string();
    }

    if let (Some(name), Some(secret)) = (
        policy.trusted_proxy_secret_header.as_deref(),
        policy.trusted_proxy_secret.as_deref(),
    ) {
        match header(name) {
            Some(value) if value == secret => {}
            _ => return UNKNOWN_CLIENT.to_string(),
        }
    }

    if let Some(xff) = header("x-forwarded-for") {
        let hops: Vec<&str> = xff
            .split(',')
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .collect();
        if hops.len() == 1 && !policy.trust_single_x_forwarded_for {
            return UNKNOWN_CLIENT.to_string();
        }
        if let Some(last) = hops.last() {
            return (*last).to_string();
        }
    }

    UNKNOWN_CLIENT.to_string()
}
