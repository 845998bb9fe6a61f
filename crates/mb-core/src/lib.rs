// SPDX-License-Identifier: MIT OR Apache-2.0
//! Core data model for the markbase workspace service: workspaces, files,
//! folders, append entries, capability keys, idempotency records, audit
//! entries, and webhook subscriptions, plus the response envelope and the
//! content-hash / ETag helpers shared by every component.

#![deny(unsafe_code)]

mod envelope;
mod etag;
mod event;
mod model;

pub use envelope::{ErrEnvelope, OkEnvelope};
pub use etag::{content_hash, etag_for, etag_matches};
pub use event::{EventKind, EventSink, NullSink, WebhookEvent};
pub use model::*;
