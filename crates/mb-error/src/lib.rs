//! Closed error-code taxonomy for the markbase API surface.
//!
//! Every recoverable failure that crosses the API boundary carries an
//! [`ErrorCode`] (a machine-readable, stable string tag), a human-readable
//! message, and an optional key-value details map.  Use the builder returned
//! by [`ApiError::new`] to construct errors fluently.
//!
//! The taxonomy also encodes the security-motivated 404 policy: outcomes
//! that would otherwise reveal the existence of a capability key, its tier,
//! or its scope are mapped to 404, never 403.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Keys --
    /// The supplied capability key is unknown or malformed.
    InvalidKey,
    /// The capability key was explicitly revoked.
    KeyRevoked,
    /// The capability key has passed its expiry time.
    KeyExpired,
    /// No key record exists for the given identifier.
    KeyNotFound,
    /// An API key lacks a required scope.
    PermissionDenied,

    // -- Input validation --
    /// The path failed validation (traversal, control bytes, length).
    InvalidPath,
    /// The request body or parameters are malformed.
    InvalidRequest,
    /// The append id does not match the `a<n>` pattern.
    InvalidAppendId,
    /// The author string contains unsafe characters or is empty.
    InvalidAuthor,
    /// A supplied pattern (filter / glob) is malformed.
    InvalidPattern,
    /// A supplied timeout is out of range.
    InvalidTimeout,
    /// The search query exceeds the length bound.
    QueryTooLong,
    /// The search scope fans out over too many files.
    QueryTooBroad,

    // -- Files & folders --
    /// No non-deleted file exists at the path.
    FileNotFound,
    /// The file exists but is soft-deleted.
    FileDeleted,
    /// A non-deleted file already occupies the path.
    FileAlreadyExists,
    /// No folder exists at the path.
    FolderNotFound,
    /// An explicit folder already exists at the path.
    FolderAlreadyExists,
    /// The folder still contains files.
    FolderNotEmpty,
    /// A folder occupies the target path.
    FolderExists,
    /// The confirmation path does not match the target.
    ConfirmPathMismatch,
    /// The copy / move source does not exist.
    SourceNotFound,

    // -- Concurrency & limits --
    /// An `If-Match` precondition failed against the current ETag.
    Conflict,
    /// The content exceeds the per-file size cap.
    PayloadTooLarge,
    /// The mutation would exceed the workspace storage quota.
    QuotaExceeded,

    // -- Other resources --
    /// No append entry exists with the given id.
    AppendNotFound,
    /// No workspace exists with the given id.
    WorkspaceNotFound,
    /// No webhook subscription exists with the given id.
    WebhookNotFound,
    /// The operation falls outside the key's scope.
    ScopeDenied,

    // -- Transport-level --
    /// The caller exceeded a rate limit.
    RateLimited,
    /// Bearer authentication failed.
    Unauthorized,
    /// Generic not-found, also used to hide key existence.
    NotFound,
    /// Catch-all for unexpected internal errors.
    ServerError,
}

impl ErrorCode {
    /// Stable `&'static str` representation (e.g. `"INVALID_KEY"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidKey => "INVALID_KEY",
            Self::KeyRevoked => "KEY_REVOKED",
            Self::KeyExpired => "KEY_EXPIRED",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InvalidPath => "INVALID_PATH",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidAppendId => "INVALID_APPEND_ID",
            Self::InvalidAuthor => "INVALID_AUTHOR",
            Self::InvalidPattern => "INVALID_PATTERN",
            Self::InvalidTimeout => "INVALID_TIMEOUT",
            Self::QueryTooLong => "QUERY_TOO_LONG",
            Self::QueryTooBroad => "QUERY_TOO_BROAD",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::FileDeleted => "FILE_DELETED",
            Self::FileAlreadyExists => "FILE_ALREADY_EXISTS",
            Self::FolderNotFound => "FOLDER_NOT_FOUND",
            Self::FolderAlreadyExists => "FOLDER_ALREADY_EXISTS",
            Self::FolderNotEmpty => "FOLDER_NOT_EMPTY",
            Self::FolderExists => "FOLDER_EXISTS",
            Self::ConfirmPathMismatch => "CONFIRM_PATH_MISMATCH",
            Self::SourceNotFound => "SOURCE_NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::AppendNotFound => "APPEND_NOT_FOUND",
            Self::WorkspaceNotFound => "WORKSPACE_NOT_FOUND",
            Self::WebhookNotFound => "WEBHOOK_NOT_FOUND",
            Self::ScopeDenied => "SCOPE_DENIED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::ServerError => "SERVER_ERROR",
        }
    }

    /// The HTTP status this code maps to on the wire.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidPath
            | Self::InvalidRequest
            | Self::InvalidAppendId
            | Self::InvalidAuthor
            | Self::InvalidPattern
            | Self::InvalidTimeout
            | Self::QueryTooLong
            | Self::QueryTooBroad
            | Self::ConfirmPathMismatch => 400,

            Self::Unauthorized => 401,

            // API-key (admin) surface only; capability-key tier mismatches
            // are mapped to 404 by the resolver before reaching here.
            Self::PermissionDenied | Self::ScopeDenied => 403,

            Self::InvalidKey
            | Self::KeyExpired
            | Self::KeyNotFound
            | Self::FileNotFound
            | Self::FolderNotFound
            | Self::SourceNotFound
            | Self::AppendNotFound
            | Self::WorkspaceNotFound
            | Self::WebhookNotFound
            | Self::NotFound => 404,

            Self::FileAlreadyExists
            | Self::FolderAlreadyExists
            | Self::FolderNotEmpty
            | Self::FolderExists => 409,

            Self::KeyRevoked | Self::FileDeleted => 410,

            Self::Conflict => 412,

            Self::PayloadTooLarge | Self::QuotaExceeded => 413,

            Self::RateLimited => 429,

            Self::ServerError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All error codes, for exhaustive iteration in tests and docs.
pub const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::InvalidKey,
    ErrorCode::KeyRevoked,
    ErrorCode::KeyExpired,
    ErrorCode::KeyNotFound,
    ErrorCode::PermissionDenied,
    ErrorCode::InvalidPath,
    ErrorCode::InvalidRequest,
    ErrorCode::InvalidAppendId,
    ErrorCode::InvalidAuthor,
    ErrorCode::InvalidPattern,
    ErrorCode::InvalidTimeout,
    ErrorCode::QueryTooLong,
    ErrorCode::QueryTooBroad,
    ErrorCode::FileNotFound,
    ErrorCode::FileDeleted,
    ErrorCode::FileAlreadyExists,
    ErrorCode::FolderNotFound,
    ErrorCode::FolderAlreadyExists,
    ErrorCode::FolderNotEmpty,
    ErrorCode::FolderExists,
    ErrorCode::ConfirmPathMismatch,
    ErrorCode::SourceNotFound,
    ErrorCode::Conflict,
    ErrorCode::PayloadTooLarge,
    ErrorCode::QuotaExceeded,
    ErrorCode::AppendNotFound,
    ErrorCode::WorkspaceNotFound,
    ErrorCode::WebhookNotFound,
    ErrorCode::ScopeDenied,
    ErrorCode::RateLimited,
    ErrorCode::Unauthorized,
    ErrorCode::NotFound,
    ErrorCode::ServerError,
];

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Structured API error carried in the `{ok:false, error:{…}}` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details (deterministic ordering).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, serde_json::Value>>,
}

impl ApiError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach a key-value pair to the details map.
    ///
    /// The value is converted via [`serde_json::to_value`]; entries that fail
    /// to serialise are skipped.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details
                .get_or_insert_with(BTreeMap::new)
                .insert(key.into(), v);
        }
        self
    }

    /// Shorthand for `self.code.http_status()`.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    // -- Convenience constructors for the hot codes --------------------------

    /// 404 `INVALID_KEY` — unknown or malformed capability key.  Also used
    /// for tier mismatches so the response never distinguishes "wrong tier"
    /// from "unknown key".
    pub fn invalid_key() -> Self {
        Self::new(ErrorCode::InvalidKey, "invalid key")
    }

    /// 404 `NOT_FOUND` — generic hiding response.
    pub fn not_found() -> Self {
        Self::new(ErrorCode::NotFound, "not found")
    }

    /// 410 `KEY_REVOKED`.
    pub fn key_revoked() -> Self {
        Self::new(ErrorCode::KeyRevoked, "key has been revoked")
    }

    /// 400 `INVALID_PATH`.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPath, message)
    }

    /// 400 `INVALID_REQUEST`.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// 404 `FILE_NOT_FOUND`.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::new(ErrorCode::FileNotFound, "file not found").with_detail("path", path.into())
    }

    /// 500 `SERVER_ERROR`.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if let Some(ref details) = self.details
            && let Ok(d) = serde_json::to_string(details)
        {
            write!(f, " {d}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Result alias used across the core.
pub type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
