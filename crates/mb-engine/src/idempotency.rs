// SPDX-License-Identifier: MIT OR Apache-2.0
//! Idempotency replay: store a response envelope under the client token and
//! replay it verbatim on repeats.
//!
//! Tokens are opaque; the store's insert-if-absent makes concurrent
//! first-time inserts converge on a single winner, and losers replay the
//! winner's record.

use chrono::Utc;
use mb_core::IdempotencyRecord;
use mb_store::{PutOutcome, Store};
use uuid::Uuid;

/// A response ready to re-emit.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    /// HTTP status of the original response.
    pub status: u16,
    /// Serialized body of the original response.
    pub body: serde_json::Value,
}

/// Look up a prior response for `token`, if any.
pub async fn lookup_replay(store: &Store, token: &str) -> Option<StoredResponse> {
    store
        .idempotency_by_token(token)
        .await
        .map(|record| StoredResponse {
            status: record.status,
            body: record.body,
        })
}

/// Store the response for `token`.  If a concurrent request won the insert,
/// the winner's envelope is returned so the caller can emit that instead.
pub async fn store_response(
    store: &Store,
    key_id: Uuid,
    token: &str,
    status: u16,
    body: serde_json::Value,
) -> Option<StoredResponse> {
    let record = IdempotencyRecord {
        token: token.to_string(),
        key_id,
        status,
        body,
        created_at: Utc::now(),
    };
    match store.put_idempotency_if_absent(record).await {
        PutOutcome::Inserted => None,
        PutOutcome::Existing(winner) => Some(StoredResponse {
            status: winner.status,
            body: winner.body,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn roundtrip() {
        let store = Store::in_memory();
        let key_id = Uuid::new_v4();
        assert!(lookup_replay(&store, "tok").await.is_none());

        let raced = store_response(&store, key_id, "tok", 201, json!({"ok": true})).await;
        assert!(raced.is_none());

        let replay = lookup_replay(&store, "tok").await.unwrap();
        assert_eq!(replay.status, 201);
        assert_eq!(replay.body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn loser_gets_winner_envelope() {
        let store = Store::in_memory();
        let key_id = Uuid::new_v4();
        store_response(&store, key_id, "tok", 201, json!({"winner": 1})).await;
        let raced = store_response(&store, key_id, "tok", 200, json!({"loser": 1}))
            .await
            .unwrap();
        assert_eq!(raced.status, 201);
        assert_eq!(raced.body, json!({"winner": 1}));
    }
}
