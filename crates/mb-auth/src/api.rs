// SPDX-License-Identifier: MIT OR Apache-2.0
//! `sk_live_` / `sk_test_` bearer key resolution for the `/api/v1` surface.
//!
//! Unlike capability keys, this surface is allowed to distinguish 401 from
//! 403: bearer failures answer `UNAUTHORIZED`, scope shortfalls answer
//! `PERMISSION_DENIED`.

use chrono::Utc;
use mb_core::ApiScope;
use mb_error::{ApiError, ApiResult, ErrorCode};
use mb_keys::hash_key;
use mb_store::Store;
use std::collections::BTreeSet;
use uuid::Uuid;

/// A resolved API key grant.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiAuthorization {
    /// Key record id.
    pub key_id: Uuid,
    /// Workspace the key administers.
    pub workspace_id: Uuid,
    /// Granted scopes.
    pub scopes: BTreeSet<ApiScope>,
    /// Live vs test key.
    pub live: bool,
}

/// Resolve an `Authorization: Bearer sk_…` value and require `scope`.
pub async fn resolve_api_key(
    store: &Store,
    bearer: &str,
    scope: ApiScope,
) -> ApiResult<ApiAuthorization> {
    let unauthorized = || ApiError::new(ErrorCode::Unauthorized, "invalid bearer token");

    if !mb_keys::is_valid_api_key(bearer) {
        return Err(unauthorized());
    }

    let Some(record) = store.api_key_by_hash(&hash_key(bearer)).await else {
        return Err(unauthorized());
    };
    if record.revoked_at.is_some() {
        return Err(unauthorized());
    }
    if let Some(expires_at) = record.expires_at
        && expires_at <= Utc::now()
    {
        return Err(unauthorized());
    }

    if !record.grants(scope) {
        return Err(ApiError::new(
            ErrorCode::PermissionDenied,
            format!("key lacks the '{}' scope", scope_tag(scope)),
        ));
    }

    Ok(ApiAuthorization {
        key_id: record.id,
        workspace_id: record.workspace_id,
        scopes: record.scopes.clone(),
        live: record.live,
    })
}

fn scope_tag(scope: ApiScope) -> &'static str {
    match scope {
        ApiScope::Read => "read",
        ApiScope::Append => "append",
        ApiScope::Write => "write",
        ApiScope::Export => "export",
        ApiScope::Search => "search",
        ApiScope::All => "*",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_core::ApiKeyRecord;
    use mb_keys::{generate_api_key, key_prefix};

    async fn store_with_key(scopes: &str) -> (Store, String) {
        let store = Store::in_memory();
        let ws = store.create_workspace("ws").await;
        let plaintext = generate_api_key(false);
        store
            .insert_api_key(ApiKeyRecord {
                id: Uuid::new_v4(),
                workspace_id: ws.id,
                prefix: key_prefix(&plaintext),
                hash: hash_key(&plaintext),
                scopes: ApiScope::parse_set(scopes).unwrap(),
                live: false,
                created_at: Utc::now(),
                expires_at: None,
                revoked_at: None,
            })
            .await;
        (store, plaintext)
    }

    #[tokio::test]
    async fn grants_matching_scope() {
        let (store, key) = store_with_key("search,export").await;
        let auth = resolve_api_key(&store, &key, ApiScope::Search).await.unwrap();
        assert!(!auth.live);
    }

    #[tokio::test]
    async fn star_grants_all() {
        let (store, key) = store_with_key("*").await;
        assert!(resolve_api_key(&store, &key, ApiScope::Export).await.is_ok());
    }

    #[tokio::test]
    async fn missing_scope_is_403() {
        let (store, key) = store_with_key("read").await;
        let err = resolve_api_key(&store, &key, ApiScope::Export).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn bad_bearer_is_401() {
        let (store, _) = store_with_key("read").await;
        for bad in ["", "sk_live_short", "not-a-key", &generate_api_key(true)] {
            let err = resolve_api_key(&store, bad, ApiScope::Read).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::Unauthorized, "{bad}");
        }
    }
}
