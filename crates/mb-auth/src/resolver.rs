// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability key resolution.
//!
//! Every failure that could reveal a key's existence, tier, or scope is
//! collapsed into 404: pattern failures and unknown hashes answer
//! `INVALID_KEY`; expired keys, tier shortfalls, and scope mismatches answer
//! `NOT_FOUND` / `INVALID_KEY`.  Only an actively revoked key answers 410
//! `KEY_REVOKED` — the sole acknowledgement that a key ever existed.

use chrono::Utc;
use mb_core::{CapabilityKey, Permission, ScopeType};
use mb_error::{ApiError, ApiResult};
use mb_keys::{ScopedPrefix, generate_key, generate_scoped_key, hash_key, key_prefix, secure_compare};
use mb_store::Store;
use tracing::debug;
use uuid::Uuid;

/// What the caller requires of the key being resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Minimum permission tier; shortfall hides as 404.
    pub required_permission: Option<Permission>,
    /// Canonical path the request targets; folder- and file-scope keys must
    /// contain it.
    pub path_hint: Option<String>,
}

/// A resolved, scope-checked authorization bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    /// Key record id.
    pub key_id: Uuid,
    /// Workspace the key belongs to.
    pub workspace_id: Uuid,
    /// Granted permission tier.
    pub permission: Permission,
    /// Scope type.
    pub scope_type: ScopeType,
    /// Scope path for folder / file scopes.
    pub scope_path: Option<String>,
    /// Display prefix of the plaintext.
    pub prefix: String,
}

impl Authorization {
    /// The single file path a file-scope key is bound to.
    pub fn file_scope_path(&self) -> Option<&str> {
        match self.scope_type {
            ScopeType::File => self.scope_path.as_deref(),
            _ => None,
        }
    }

    /// The folder prefix reads and listings are confined to.
    pub fn effective_prefix(&self) -> &str {
        match self.scope_type {
            ScopeType::Workspace => "/",
            ScopeType::Folder | ScopeType::File => self.scope_path.as_deref().unwrap_or("/"),
        }
    }

    /// Whether `path` lies within this key's scope.
    pub fn contains_path(&self, path: &str) -> bool {
        match self.scope_type {
            ScopeType::Workspace => true,
            ScopeType::Folder => self
                .scope_path
                .as_deref()
                .map(|scope| mb_path::scope_contains(scope, path))
                .unwrap_or(false),
            ScopeType::File => self.scope_path.as_deref() == Some(path),
        }
    }
}

/// Resolve a plaintext capability key into an [`Authorization`].
pub async fn resolve_capability(
    store: &Store,
    plaintext: &str,
    opts: ResolveOptions,
) -> ApiResult<Authorization> {
    if !mb_keys::is_valid_capability_key(plaintext) {
        return Err(ApiError::invalid_key());
    }

    let hash = hash_key(plaintext);
    let Some(record) = store.capability_key_by_hash(&hash).await else {
        return Err(ApiError::invalid_key());
    };
    // The index lookup found the row; confirm equality without timing leaks.
    if !secure_compare(&hash, &record.hash) {
        return Err(ApiError::invalid_key());
    }

    if record.revoked_at.is_some() {
        return Err(ApiError::key_revoked());
    }
    if let Some(expires_at) = record.expires_at
        && expires_at <= Utc::now()
    {
        // Expired keys are hidden behind not-found.
        return Err(ApiError::not_found());
    }

    if let Some(required) = opts.required_permission
        && !record.permission.satisfies(required)
    {
        // Tier mismatches must not leak key existence: 404, never 403.
        debug!(key = %record.prefix, "permission tier below requirement");
        return Err(ApiError::invalid_key());
    }

    if let Some(hint) = opts.path_hint.as_deref() {
        let contained = match record.scope_type {
            ScopeType::Workspace => true,
            ScopeType::Folder => record
                .scope_path
                .as_deref()
                .map(|scope| mb_path::scope_contains(scope, hint))
                .unwrap_or(false),
            ScopeType::File => record.scope_path.as_deref() == Some(hint),
        };
        if !contained {
            return Err(ApiError::not_found());
        }
    }

    Ok(Authorization {
        key_id: record.id,
        workspace_id: record.workspace_id,
        permission: record.permission,
        scope_type: record.scope_type,
        scope_path: record.scope_path.clone(),
        prefix: record.prefix.clone(),
    })
}

/// Mint and store a capability key, returning the record and the plaintext.
///
/// Workspace-scope keys are bare base62; folder and file scopes carry the
/// tier prefix.  The plaintext leaves this function exactly once.
pub async fn mint_capability(
    store: &Store,
    workspace_id: Uuid,
    permission: Permission,
    scope_type: ScopeType,
    scope_path: Option<String>,
) -> (CapabilityKey, String) {
    let plaintext = match scope_type {
        ScopeType::Workspace => generate_key(mb_keys::MIN_KEY_LEN),
        ScopeType::Folder | ScopeType::File => {
            let prefix: ScopedPrefix = permission.scoped_prefix();
            generate_scoped_key(prefix)
        }
    };
    let record = CapabilityKey {
        id: Uuid::new_v4(),
        workspace_id,
        prefix: key_prefix(&plaintext),
        hash: hash_key(&plaintext),
        permission,
        scope_type,
        scope_path,
        created_at: Utc::now(),
        expires_at: None,
        revoked_at: None,
    };
    store.insert_capability_key(record.clone()).await;
    (record, plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_error::ErrorCode;

    async fn setup() -> (Store, Uuid) {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        (store, ws.id)
    }

    #[tokio::test]
    async fn malformed_keys_answer_invalid_key() {
        let (store, _) = setup().await;
        for bad in ["", "short", "x_aaaaaaaaaaaaaaaaaaaa", "has spaces everywhere!"] {
            let err = resolve_capability(&store, bad, ResolveOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidKey, "{bad}");
            assert_eq!(err.http_status(), 404);
        }
    }

    #[tokio::test]
    async fn unknown_key_answers_invalid_key() {
        let (store, _) = setup().await;
        let err = resolve_capability(
            &store,
            &mb_keys::generate_key(22),
            ResolveOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidKey);
    }

    #[tokio::test]
    async fn happy_path_returns_bundle() {
        let (store, ws) = setup().await;
        let (record, plaintext) = mint_capability(
            &store,
            ws,
            Permission::Write,
            ScopeType::Workspace,
            None,
        )
        .await;

        let auth = resolve_capability(&store, &plaintext, ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(auth.key_id, record.id);
        assert_eq!(auth.workspace_id, ws);
        assert_eq!(auth.permission, Permission::Write);
        assert_eq!(auth.prefix, mb_keys::key_prefix(&plaintext));
    }

    #[tokio::test]
    async fn revoked_answers_410() {
        let (store, ws) = setup().await;
        let (record, plaintext) =
            mint_capability(&store, ws, Permission::Read, ScopeType::Workspace, None).await;
        store.revoke_key(record.id).await.unwrap();

        let err = resolve_capability(&store, &plaintext, ResolveOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::KeyRevoked);
        assert_eq!(err.http_status(), 410);
    }

    #[tokio::test]
    async fn expired_hides_as_not_found() {
        let (store, ws) = setup().await;
        let (record, plaintext) =
            mint_capability(&store, ws, Permission::Read, ScopeType::Workspace, None).await;
        let mut expired = record.clone();
        expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.insert_capability_key(expired).await;

        let err = resolve_capability(&store, &plaintext, ResolveOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn tier_shortfall_is_indistinguishable_from_unknown() {
        let (store, ws) = setup().await;
        let (_, plaintext) = mint_capability(
            &store,
            ws,
            Permission::Read,
            ScopeType::Folder,
            Some("/docs".into()),
        )
        .await;

        let err = resolve_capability(
            &store,
            &plaintext,
            ResolveOptions {
                required_permission: Some(Permission::Write),
                path_hint: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidKey);
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn higher_tier_satisfies_lower_requirement() {
        let (store, ws) = setup().await;
        let (_, plaintext) =
            mint_capability(&store, ws, Permission::Write, ScopeType::Workspace, None).await;
        let auth = resolve_capability(
            &store,
            &plaintext,
            ResolveOptions {
                required_permission: Some(Permission::Read),
                path_hint: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(auth.permission, Permission::Write);
    }

    #[tokio::test]
    async fn folder_scope_containment() {
        let (store, ws) = setup().await;
        let (_, plaintext) = mint_capability(
            &store,
            ws,
            Permission::Read,
            ScopeType::Folder,
            Some("/docs".into()),
        )
        .await;

        let ok = resolve_capability(
            &store,
            &plaintext,
            ResolveOptions {
                required_permission: Some(Permission::Read),
                path_hint: Some("/docs/readme.md".into()),
            },
        )
        .await;
        assert!(ok.is_ok());

        let err = resolve_capability(
            &store,
            &plaintext,
            ResolveOptions {
                required_permission: Some(Permission::Read),
                path_hint: Some("/docs-backup/readme.md".into()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn file_scope_requires_exact_path() {
        let (store, ws) = setup().await;
        let (_, plaintext) = mint_capability(
            &store,
            ws,
            Permission::Write,
            ScopeType::File,
            Some("/notes.md".into()),
        )
        .await;

        assert!(
            resolve_capability(
                &store,
                &plaintext,
                ResolveOptions {
                    required_permission: None,
                    path_hint: Some("/notes.md".into()),
                },
            )
            .await
            .is_ok()
        );

        let err = resolve_capability(
            &store,
            &plaintext,
            ResolveOptions {
                required_permission: None,
                path_hint: Some("/other.md".into()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn scoped_plaintext_carries_tier_prefix() {
        let (store, ws) = setup().await;
        let (_, read) = mint_capability(
            &store,
            ws,
            Permission::Read,
            ScopeType::File,
            Some("/a.md".into()),
        )
        .await;
        let (_, write) = mint_capability(
            &store,
            ws,
            Permission::Write,
            ScopeType::File,
            Some("/a.md".into()),
        )
        .await;
        assert!(read.starts_with("r_"));
        assert!(write.starts_with("w_"));
    }

    #[test]
    fn authorization_scope_helpers() {
        let auth = Authorization {
            key_id: Uuid::nil(),
            workspace_id: Uuid::nil(),
            permission: Permission::Read,
            scope_type: ScopeType::Folder,
            scope_path: Some("/docs".into()),
            prefix: "r_ab".into(),
        };
        assert!(auth.contains_path("/docs/a.md"));
        assert!(!auth.contains_path("/docs-backup/a.md"));
        assert_eq!(auth.effective_prefix(), "/docs");
        assert_eq!(auth.file_scope_path(), None);
    }
}
