// SPDX-License-Identifier: MIT OR Apache-2.0
//! Entity types persisted by the store.  Wire representations are camelCase;
//! record ids are v4 UUIDs, timestamps are UTC.

use chrono::{DateTime, Utc};
use mb_keys::ScopedPrefix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Free-form settings object attached to files and folders.
pub type Settings = BTreeMap<String, serde_json::Value>;

/// Days a soft-deleted file stays recoverable.
pub const RECOVERY_WINDOW_DAYS: i64 = 7;

/// Characters of append content retained as the preview.
pub const PREVIEW_MAX_CHARS: usize = 240;

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// A tenant: owns files, folders, keys, webhooks, and its audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Record id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion time, if deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Bytes of live file content.  Never negative; adjusted atomically by
    /// the store on every content mutation.
    pub storage_used_bytes: u64,
    /// When the workspace was bound to an authenticated owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// A Markdown document at an absolute forward-slash path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Opaque record id.
    pub id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// Canonical path: leading `/`, no trailing `/` except root.
    pub path: String,
    /// UTF-8 content.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion marker; recoverable for [`RECOVERY_WINDOW_DAYS`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Free-form configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

impl FileRecord {
    /// Content size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.content.len() as u64
    }

    /// Deadline after which a soft-deleted file is no longer recoverable.
    pub fn recovery_deadline(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
            .map(|at| at + chrono::Duration::days(RECOVERY_WINDOW_DAYS))
    }
}

// ---------------------------------------------------------------------------
// Folder
// ---------------------------------------------------------------------------

/// An explicit folder record (virtual folders are implied by file paths).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    /// Record id.
    pub id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// Canonical id form: no trailing slash.
    pub path: String,
    /// Free-form configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Append entries
// ---------------------------------------------------------------------------

/// Closed set of append entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendType {
    /// A unit of collaborative work.
    Task,
    /// A time-bounded lease on a task.
    Claim,
    /// Completes the referenced task.
    Response,
    /// Free-form commentary.
    Comment,
    /// Marks the referenced task blocked.
    Blocked,
    /// Answers a `blocked` entry.
    Answer,
    /// Extends a claim lease.
    Renew,
    /// Cancels a claim.
    Cancel,
    /// A vote on a task.
    Vote,
}

impl AppendType {
    /// Stable lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Claim => "claim",
            Self::Response => "response",
            Self::Comment => "comment",
            Self::Blocked => "blocked",
            Self::Answer => "answer",
            Self::Renew => "renew",
            Self::Cancel => "cancel",
            Self::Vote => "vote",
        }
    }

    /// Parse a lowercase tag.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "task" => Self::Task,
            "claim" => Self::Claim,
            "response" => Self::Response,
            "comment" => Self::Comment,
            "blocked" => Self::Blocked,
            "answer" => Self::Answer,
            "renew" => Self::Renew,
            "cancel" => Self::Cancel,
            "vote" => Self::Vote,
            _ => return None,
        })
    }
}

impl fmt::Display for AppendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task / append priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Lowest.
    Low,
    /// Default.
    #[default]
    Medium,
    /// Elevated.
    High,
    /// Highest.
    Critical,
}

impl Priority {
    /// Parse a lowercase tag.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => return None,
        })
    }
}

/// One insertion-ordered entry in a file's append log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntry {
    /// Record id.
    pub id: Uuid,
    /// Owning file.
    pub file_id: Uuid,
    /// Global monotonic insertion order.
    pub rowid: u64,
    /// Dense public id, `a<n>` per file.
    pub public_id: String,
    /// Author string (validated on insert).
    pub author: String,
    /// Entry type.
    #[serde(rename = "type")]
    pub kind: AppendType,
    /// Free-form status tag (`active`, `done`, …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Priority, defaulting to medium.
    pub priority: Priority,
    /// Label set.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    /// Public id of another append in the same file.
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Truncated content preview.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    /// Hash of the parent file content at insertion time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Lease expiry (claims).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Due date (tasks).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

/// Whether a string matches the public append id pattern `a\d+`.
pub fn is_valid_append_id(s: &str) -> bool {
    s.len() >= 2
        && s.starts_with('a')
        && s[1..].bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Capability keys
// ---------------------------------------------------------------------------

/// Permission tier, totally ordered: `read < append < write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read files, folders, stats, appends.
    Read,
    /// Read plus appending log entries and subscriptions.
    Append,
    /// Full mutation rights.
    Write,
}

impl Permission {
    /// Stable lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Append => "append",
            Self::Write => "write",
        }
    }

    /// The URL token prefix for this tier.
    pub fn scoped_prefix(&self) -> ScopedPrefix {
        match self {
            Self::Read => ScopedPrefix::Read,
            Self::Append => ScopedPrefix::Append,
            Self::Write => ScopedPrefix::Write,
        }
    }

    /// Whether this tier meets or exceeds `required`.
    pub fn satisfies(&self, required: Permission) -> bool {
        *self >= required
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a capability key may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    /// The whole workspace.
    Workspace,
    /// A folder subtree.
    Folder,
    /// A single file.
    File,
}

/// A stored capability key.  The plaintext is never persisted; lookups go
/// through the SHA-256 hash, confirmed with a constant-time compare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityKey {
    /// Record id.
    pub id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// First four plaintext characters, for display.
    pub prefix: String,
    /// 64 lowercase hex characters of SHA-256.
    pub hash: String,
    /// Permission tier.
    pub permission: Permission,
    /// Scope type.
    pub scope_type: ScopeType,
    /// Scope path for folder / file scopes.  Weak reference: the target may
    /// not exist yet or may have been deleted; resolution fails closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_path: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optional expiry; expired keys are hidden behind not-found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation time; revoked keys answer 410.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Scoped API keys
// ---------------------------------------------------------------------------

/// Scope grants carried by an `sk_` API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiScope {
    /// Read file and folder data.
    Read,
    /// Append log entries.
    Append,
    /// Mutate files.
    Write,
    /// Export archives.
    Export,
    /// Full-text search.
    Search,
    /// Everything.
    #[serde(rename = "*")]
    All,
}

impl ApiScope {
    /// Parse one scope token.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim() {
            "read" => Self::Read,
            "append" => Self::Append,
            "write" => Self::Write,
            "export" => Self::Export,
            "search" => Self::Search,
            "*" => Self::All,
            _ => return None,
        })
    }

    /// Parse a comma-separated scope list.
    pub fn parse_set(s: &str) -> Option<BTreeSet<Self>> {
        let mut out = BTreeSet::new();
        for token in s.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            out.insert(Self::parse(token)?);
        }
        if out.is_empty() { None } else { Some(out) }
    }
}

/// A stored API key for the `/api/v1` surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    /// Record id.
    pub id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// Display prefix (`sk_live_ab…`).
    pub prefix: String,
    /// SHA-256 of the plaintext.
    pub hash: String,
    /// Granted scopes.
    pub scopes: BTreeSet<ApiScope>,
    /// `sk_live_` vs `sk_test_`.
    pub live: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optional expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// Whether the key grants `scope` (directly or via `*`).
    pub fn grants(&self, scope: ApiScope) -> bool {
        self.scopes.contains(&ApiScope::All) || self.scopes.contains(&scope)
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

/// A stored response envelope, replayed verbatim for repeated tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    /// Client-supplied token (opaque).
    pub token: String,
    /// Capability key that issued the original request.
    pub key_id: Uuid,
    /// Stored HTTP status.
    pub status: u16,
    /// Stored serialized response body.
    pub body: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Closed set of auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    /// Workspace created via bootstrap.
    #[serde(rename = "workspace.bootstrap")]
    WorkspaceBootstrap,
    /// Workspace bound to an owner.
    #[serde(rename = "workspace.claim")]
    WorkspaceClaim,
    /// File created.
    #[serde(rename = "file.create")]
    FileCreate,
    /// File content updated.
    #[serde(rename = "file.update")]
    FileUpdate,
    /// File deleted (soft or permanent).
    #[serde(rename = "file.delete")]
    FileDelete,
    /// Soft-deleted file restored.
    #[serde(rename = "file.recover")]
    FileRecover,
    /// File moved to a new path.
    #[serde(rename = "file.move")]
    FileMove,
    /// File renamed within its folder.
    #[serde(rename = "file.rename")]
    FileRename,
    /// File settings changed.
    #[serde(rename = "file.settings")]
    FileSettings,
    /// Explicit folder created.
    #[serde(rename = "folder.create")]
    FolderCreate,
    /// Folder deleted.
    #[serde(rename = "folder.delete")]
    FolderDelete,
    /// Append entry inserted.
    #[serde(rename = "append.create")]
    AppendCreate,
    /// Claim lease renewed.
    #[serde(rename = "claim.renew")]
    ClaimRenew,
    /// Claim completed.
    #[serde(rename = "claim.complete")]
    ClaimComplete,
    /// Claim cancelled.
    #[serde(rename = "claim.cancel")]
    ClaimCancel,
    /// Claim blocked.
    #[serde(rename = "claim.block")]
    ClaimBlock,
    /// Capability keys rotated.
    #[serde(rename = "keys.rotate")]
    KeysRotate,
    /// Scoped capability URL minted.
    #[serde(rename = "keys.share")]
    KeysShare,
    /// Webhook subscription created.
    #[serde(rename = "webhook.create")]
    WebhookCreate,
    /// Webhook subscription deleted.
    #[serde(rename = "webhook.delete")]
    WebhookDelete,
    /// Workspace exported.
    #[serde(rename = "export")]
    Export,
}

impl AuditAction {
    /// Stable dotted tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkspaceBootstrap => "workspace.bootstrap",
            Self::WorkspaceClaim => "workspace.claim",
            Self::FileCreate => "file.create",
            Self::FileUpdate => "file.update",
            Self::FileDelete => "file.delete",
            Self::FileRecover => "file.recover",
            Self::FileMove => "file.move",
            Self::FileRename => "file.rename",
            Self::FileSettings => "file.settings",
            Self::FolderCreate => "folder.create",
            Self::FolderDelete => "folder.delete",
            Self::AppendCreate => "append.create",
            Self::ClaimRenew => "claim.renew",
            Self::ClaimComplete => "claim.complete",
            Self::ClaimCancel => "claim.cancel",
            Self::ClaimBlock => "claim.block",
            Self::KeysRotate => "keys.rotate",
            Self::KeysShare => "keys.share",
            Self::WebhookCreate => "webhook.create",
            Self::WebhookDelete => "webhook.delete",
            Self::Export => "export",
        }
    }
}

/// One audit trail row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Record id.
    pub id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// Action tag.
    pub action: AuditAction,
    /// Resource type (`file`, `folder`, `key`, `webhook`, `workspace`).
    pub resource_type: String,
    /// Resource record id, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Resource path, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_path: Option<String>,
    /// Acting principal (key prefix or owner id).
    pub actor: String,
    /// Kind of principal (`capability`, `api_key`, `owner`, `system`).
    pub actor_type: String,
    /// Arbitrary metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Originating client IP, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// User agent, if supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

/// A workspace-scoped webhook subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    /// Record id.
    pub id: Uuid,
    /// Owning workspace.
    pub workspace_id: Uuid,
    /// Target URL (SSRF-checked at dispatch time).
    pub url: String,
    /// Event kinds this subscription wants; empty means all.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub events: BTreeSet<crate::EventKind>,
    /// Shared secret for the HMAC signature.
    pub secret: String,
    /// Optional folder-path filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
