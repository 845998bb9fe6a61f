// SPDX-License-Identifier: MIT OR Apache-2.0
//! Outbound webhook dispatch.
//!
//! For each event the dispatcher enumerates the workspace's subscriptions,
//! filters by event kind and folder path, runs the SSRF filter against the
//! target, and POSTs a JSON envelope with a detached HMAC-SHA-256 signature.
//! Transport errors and 5xx responses are retried with bounded exponential
//! backoff.  Failures are logged, never propagated to the request that
//! produced the event.

#![deny(unsafe_code)]

use hmac::{Hmac, Mac};
use mb_core::{EventSink, WebhookEvent, WebhookSubscription};
use mb_netguard::{SsrfPolicy, check_url};
use mb_store::Store;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Signature header carried on every delivery.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Event kind header, so receivers can route before parsing the body.
pub const EVENT_HEADER: &str = "x-webhook-event";

/// Delivery attempts per subscription per event.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base backoff; doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA-256 of `body` under `secret`, in `sha256=<hex>` form.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let mut out = String::with_capacity(7 + 64);
    out.push_str("sha256=");
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Whether `sub` wants `event`.
pub fn subscription_matches(sub: &WebhookSubscription, event: &WebhookEvent) -> bool {
    if !sub.events.is_empty() && !sub.events.contains(&event.kind) {
        return false;
    }
    if let Some(folder) = sub.folder_path.as_deref()
        && !mb_path::scope_contains(folder, &event.path)
    {
        return false;
    }
    true
}

/// The outbound dispatcher.  Clone freely; the HTTP client is shared.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<Store>,
    client: reqwest::Client,
    policy: SsrfPolicy,
}

impl Dispatcher {
    /// Build a dispatcher over `store`; `allow_http` mirrors
    /// `ALLOW_HTTP_WEBHOOKS`.
    pub fn new(store: Arc<Store>, allow_http: bool) -> Self {
        Self::with_policy(
            store,
            SsrfPolicy {
                allow_http,
                ..SsrfPolicy::default()
            },
        )
    }

    /// Build a dispatcher with an explicit destination policy.
    pub fn with_policy(store: Arc<Store>, policy: SsrfPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            store,
            client,
            policy,
        }
    }

    /// Deliver `event` to every matching subscription, sequentially per
    /// subscription, concurrently across subscriptions.
    pub async fn deliver_all(&self, event: WebhookEvent) {
        let subs = self.store.webhooks_for_workspace(event.workspace_id).await;
        let body = match serde_json::to_vec(&event) {
            Ok(b) => b,
            Err(err) => {
                warn!(error = %err, "webhook event failed to serialise");
                return;
            }
        };

        let mut tasks = Vec::new();
        for sub in subs.into_iter().filter(|s| subscription_matches(s, &event)) {
            let dispatcher = self.clone();
            let body = body.clone();
            let kind = event.kind;
            tasks.push(tokio::spawn(async move {
                dispatcher.deliver_one(&sub, kind.as_str(), &body).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn deliver_one(&self, sub: &WebhookSubscription, kind: &str, body: &[u8]) {
        match check_url(&sub.url, self.policy).await {
            Ok(_) => {}
            Err(reason) => {
                warn!(url = %sub.url, %reason, "webhook target rejected");
                return;
            }
        }

        let signature = sign_body(&sub.secret, body);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(&sub.url)
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, &signature)
                .header(EVENT_HEADER, kind)
                .body(body.to_vec())
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url = %sub.url, attempt, "webhook delivered");
                    return;
                }
                Ok(resp) if resp.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                    debug!(url = %sub.url, status = %resp.status(), attempt, "retrying webhook");
                }
                Ok(resp) => {
                    warn!(url = %sub.url, status = %resp.status(), "webhook delivery gave up");
                    return;
                }
                Err(err) if attempt < MAX_ATTEMPTS => {
                    debug!(url = %sub.url, error = %err, attempt, "retrying webhook");
                }
                Err(err) => {
                    warn!(url = %sub.url, error = %err, "webhook delivery failed");
                    return;
                }
            }

            tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
        }
    }
}

impl EventSink for Dispatcher {
    fn publish(&self, event: WebhookEvent) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.deliver_all(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mb_core::EventKind;
    use std::collections::BTreeSet;
    use uuid::Uuid;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn subscription(workspace_id: Uuid, url: &str) -> WebhookSubscription {
        WebhookSubscription {
            id: Uuid::new_v4(),
            workspace_id,
            url: url.into(),
            events: BTreeSet::new(),
            secret: "hook-secret".into(),
            folder_path: None,
            created_at: Utc::now(),
        }
    }

    fn event(workspace_id: Uuid, kind: EventKind, file_path: &str) -> WebhookEvent {
        WebhookEvent {
            kind,
            workspace_id,
            path: file_path.into(),
            resource_id: None,
            payload: serde_json::json!({}),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn signature_is_stable_hex() {
        let sig = sign_body("secret", b"payload");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), 7 + 64);
        assert_eq!(sig, sign_body("secret", b"payload"));
        assert_ne!(sig, sign_body("other", b"payload"));
        assert_ne!(sig, sign_body("secret", b"different"));
    }

    #[test]
    fn matching_rules() {
        let ws = Uuid::new_v4();
        let mut sub = subscription(ws, "https://example.com/hook");

        // Empty filter matches everything.
        assert!(subscription_matches(&sub, &event(ws, EventKind::FileCreated, "/a.md")));

        sub.events = BTreeSet::from([EventKind::FileDeleted]);
        assert!(!subscription_matches(&sub, &event(ws, EventKind::FileCreated, "/a.md")));
        assert!(subscription_matches(&sub, &event(ws, EventKind::FileDeleted, "/a.md")));

        sub.events = BTreeSet::new();
        sub.folder_path = Some("/docs".into());
        assert!(subscription_matches(&sub, &event(ws, EventKind::FileCreated, "/docs/a.md")));
        assert!(!subscription_matches(&sub, &event(ws, EventKind::FileCreated, "/docs-backup/a.md")));
    }

    /// wiremock binds loopback, so tests open the `allow_private` override;
    /// production dispatchers never set it.
    fn test_dispatcher(store: Arc<Store>) -> Dispatcher {
        Dispatcher::with_policy(
            store,
            SsrfPolicy {
                allow_http: true,
                allow_private: true,
            },
        )
    }

    #[tokio::test]
    async fn delivers_with_signature_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists(SIGNATURE_HEADER))
            .and(header_exists(EVENT_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(Store::in_memory());
        let ws = store.create_workspace("ws").await;
        store
            .insert_webhook(subscription(ws.id, &format!("{}/hook", server.uri())))
            .await;

        test_dispatcher(Arc::clone(&store))
            .deliver_all(event(ws.id, EventKind::FileCreated, "/a.md"))
            .await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let sig = requests[0]
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert_eq!(sig, sign_body("hook-secret", &requests[0].body));
    }

    #[tokio::test]
    async fn retries_on_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = Arc::new(Store::in_memory());
        let ws = store.create_workspace("ws").await;
        store
            .insert_webhook(subscription(ws.id, &format!("{}/hook", server.uri())))
            .await;

        test_dispatcher(Arc::clone(&store))
            .deliver_all(event(ws.id, EventKind::FileUpdated, "/a.md"))
            .await;

        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let store = Arc::new(Store::in_memory());
        let ws = store.create_workspace("ws").await;
        store
            .insert_webhook(subscription(ws.id, &server.uri()))
            .await;

        test_dispatcher(Arc::clone(&store))
            .deliver_all(event(ws.id, EventKind::FileDeleted, "/a.md"))
            .await;

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn production_policy_blocks_loopback_targets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = Arc::new(Store::in_memory());
        let ws = store.create_workspace("ws").await;
        store
            .insert_webhook(subscription(ws.id, &format!("{}/hook", server.uri())))
            .await;

        // Default policy: loopback target is rejected before any POST.
        Dispatcher::new(Arc::clone(&store), true)
            .deliver_all(event(ws.id, EventKind::FileCreated, "/a.md"))
            .await;

        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
