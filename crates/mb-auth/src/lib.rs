// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request authentication: capability key resolution with the 404-hiding
//! security model, `sk_` API key resolution for the admin surface, and the
//! per-key rate limiter.

#![deny(unsafe_code)]

mod api;
mod ratelimit;
mod resolver;

pub use api::{ApiAuthorization, resolve_api_key};
pub use ratelimit::{RateLimiter, RetryAfter};
pub use resolver::{Authorization, ResolveOptions, mint_capability, resolve_capability};
