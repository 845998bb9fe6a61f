// SPDX-License-Identifier: MIT OR Apache-2.0
//! The uniform response envelope: `{ok:true, data}` or
//! `{ok:false, error:{code, message, details?}}`.

use serde::{Deserialize, Serialize};

/// Success envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OkEnvelope<T> {
    /// Always `true`.
    pub ok: bool,
    /// Operation payload.
    pub data: T,
}

impl<T> OkEnvelope<T> {
    /// Wrap a payload.
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

/// Failure envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrEnvelope<E> {
    /// Always `false`.
    pub ok: bool,
    /// Structured error.
    pub error: E,
}

impl<E> ErrEnvelope<E> {
    /// Wrap an error.
    pub fn new(error: E) -> Self {
        Self { ok: false, error }
    }
}
