// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and environment overrides for the
//! markbase daemon.
//!
//! This crate provides [`ServiceConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files, applying the
//! environment variables named in the external-interface contract, and
//! producing advisory [`ConfigWarning`]s.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default workspace storage quota: 100 MiB.
pub const DEFAULT_WORKSPACE_QUOTA_BYTES: u64 = 100 * 1024 * 1024;

/// Default per-file content cap: 2 MiB.
pub const DEFAULT_FILE_MAX_BYTES: u64 = 2 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Plain HTTP webhooks are enabled.
    HttpWebhooksEnabled,
    /// Proxy headers are trusted without a shared secret.
    ProxyTrustWithoutSecret,
    /// The storage quota is unusually large.
    LargeQuota {
        /// Configured quota in bytes.
        bytes: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::HttpWebhooksEnabled => {
                write!(f, "ALLOW_HTTP_WEBHOOKS is on; webhook bodies travel unencrypted")
            }
            ConfigWarning::ProxyTrustWithoutSecret => {
                write!(f, "proxy headers trusted without a shared secret gate")
            }
            ConfigWarning::LargeQuota { bytes } => {
                write!(f, "workspace quota is unusually large ({bytes} bytes)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config type
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the markbase daemon.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Public base URL used when assembling capability URLs in responses.
    pub base_url: Option<String>,

    /// Application URL (browser UI) used in bootstrap responses.
    pub app_url: Option<String>,

    /// Per-workspace storage quota in bytes.
    pub max_workspace_storage_bytes: u64,

    /// Per-file content cap in bytes.
    pub file_max_size_bytes: u64,

    /// Allow plain `http://` webhooks to public hosts.
    pub allow_http_webhooks: bool,

    /// Trust `X-Forwarded-For` from upstream proxies.
    pub trust_proxy_headers: bool,

    /// Accept single-element `X-Forwarded-For` lists.
    pub trust_single_x_forwarded_for: bool,

    /// Header name carrying the proxy shared secret.
    pub trusted_proxy_secret_header: Option<String>,

    /// Proxy shared secret value.
    pub trusted_proxy_secret: Option<String>,

    /// Test mode: disables rate limiting and silences audit FK drops.
    pub test_mode: bool,

    /// Directory for workspace snapshot files.
    pub data_dir: Option<String>,

    /// Log level override (`error`…`trace`).
    pub log_level: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            app_url: None,
            max_workspace_storage_bytes: DEFAULT_WORKSPACE_QUOTA_BYTES,
            file_max_size_bytes: DEFAULT_FILE_MAX_BYTES,
            allow_http_webhooks: false,
            trust_proxy_headers: false,
            trust_single_x_forwarded_for: false,
            trusted_proxy_secret_header: None,
            trusted_proxy_secret: None,
            test_mode: false,
            data_dir: None,
            log_level: Some("info".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`ServiceConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, starts from [`ServiceConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => ServiceConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`ServiceConfig`].
pub fn parse_toml(content: &str) -> Result<ServiceConfig, ConfigError> {
    toml::from_str::<ServiceConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Apply environment variable overrides.
///
/// Recognised variables: `BASE_URL`, `APP_URL`,
/// `MAX_WORKSPACE_STORAGE_BYTES`, `FILE_MAX_SIZE_BYTES`,
/// `ALLOW_HTTP_WEBHOOKS`, `TRUST_PROXY_HEADERS`,
/// `TRUST_SINGLE_X_FORWARDED_FOR`, `TRUSTED_PROXY_SECRET_HEADER`,
/// `TRUSTED_PROXY_SECRET`, `MB_TEST_MODE`, `MB_DATA_DIR`, `MB_LOG_LEVEL`.
pub fn apply_env_overrides(config: &mut ServiceConfig) {
    if let Ok(val) = std::env::var("BASE_URL") {
        config.base_url = Some(val);
    }
    if let Ok(val) = std::env::var("APP_URL") {
        config.app_url = Some(val);
    }
    if let Ok(val) = std::env::var("MAX_WORKSPACE_STORAGE_BYTES")
        && let Ok(bytes) = val.trim().parse::<u64>()
    {
        config.max_workspace_storage_bytes = bytes;
    }
    if let Ok(val) = std::env::var("FILE_MAX_SIZE_BYTES")
        && let Ok(bytes) = val.trim().parse::<u64>()
    {
        config.file_max_size_bytes = bytes;
    }
    if let Some(flag) = env_flag("ALLOW_HTTP_WEBHOOKS") {
        config.allow_http_webhooks = flag;
    }
    if let Some(flag) = env_flag("TRUST_PROXY_HEADERS") {
        config.trust_proxy_headers = flag;
    }
    if let Some(flag) = env_flag("TRUST_SINGLE_X_FORWARDED_FOR") {
        config.trust_single_x_forwarded_for = flag;
    }
    if let Ok(val) = std::env::var("TRUSTED_PROXY_SECRET_HEADER") {
        config.trusted_proxy_secret_header = Some(val);
    }
    if let Ok(val) = std::env::var("TRUSTED_PROXY_SECRET") {
        config.trusted_proxy_secret = Some(val);
    }
    if let Some(flag) = env_flag("MB_TEST_MODE") {
        config.test_mode = flag;
    }
    if let Ok(val) = std::env::var("MB_DATA_DIR") {
        config.data_dir = Some(val);
    }
    if let Ok(val) = std::env::var("MB_LOG_LEVEL") {
        config.log_level = Some(val);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Quota above which a warning is emitted (10 GiB).
const LARGE_QUOTA_THRESHOLD: u64 = 10 * 1024 * 1024 * 1024;

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero quotas, secret header without secret, bad log level)
/// come back as [`ConfigError::ValidationError`]; soft issues as warnings.
pub fn validate_config(config: &ServiceConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if config.max_workspace_storage_bytes == 0 {
        errors.push("max_workspace_storage_bytes must be positive".into());
    }
    if config.file_max_size_bytes == 0 {
        errors.push("file_max_size_bytes must be positive".into());
    }
    if config.file_max_size_bytes > config.max_workspace_storage_bytes {
        errors.push("file_max_size_bytes exceeds the workspace quota".into());
    }

    match (
        &config.trusted_proxy_secret_header,
        &config.trusted_proxy_secret,
    ) {
        (Some(_), None) => errors.push("trusted_proxy_secret_header set without a secret".into()),
        (None, Some(_)) => errors.push("trusted_proxy_secret set without a header name".into()),
        _ => {}
    }

    if config.allow_http_webhooks {
        warnings.push(ConfigWarning::HttpWebhooksEnabled);
    }
    if config.trust_proxy_headers && config.trusted_proxy_secret.is_none() {
        warnings.push(ConfigWarning::ProxyTrustWithoutSecret);
    }
    if config.max_workspace_storage_bytes > LARGE_QUOTA_THRESHOLD {
        warnings.push(ConfigWarning::LargeQuota {
            bytes: config.max_workspace_storage_bytes,
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
