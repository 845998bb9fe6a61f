// SPDX-License-Identifier: MIT OR Apache-2.0
//! Network edge defenses: SSRF destination filtering for outbound webhook
//! requests, and originating-client-IP resolution under a configurable
//! proxy-trust policy.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client_ip;
mod ssrf;

pub use client_ip::{ProxyTrustPolicy, UNKNOWN_CLIENT, resolve_client_ip};
pub use ssrf::{Destination, SsrfError, SsrfPolicy, check_url, check_url_syntax, is_private_ip};
