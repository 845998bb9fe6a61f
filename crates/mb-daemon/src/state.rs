// SPDX-License-Identifier: MIT OR Apache-2.0
//! Daemon state wiring: store, engine context, limiter, dispatcher.

use mb_audit::AuditQueue;
use mb_auth::RateLimiter;
use mb_config::ServiceConfig;
use mb_engine::{EngineContext, EngineLimits};
use mb_netguard::ProxyTrustPolicy;
use mb_store::Store;
use mb_telemetry::RequestMetrics;
use mb_webhook::Dispatcher;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Shared state behind every handler.
pub struct AppState {
    /// The store.
    pub store: Arc<Store>,
    /// Loaded configuration.
    pub config: ServiceConfig,
    /// Engine context (store + audit + events + limits).
    pub engine: EngineContext,
    /// Subscription-surface rate limiter.
    pub limiter: RateLimiter,
    /// Audit queue handle.
    pub audit: AuditQueue,
    /// Request latency metrics.
    pub metrics: RequestMetrics,
    /// Process start, for `/health` uptime.
    pub started_at: Instant,
}

impl AppState {
    /// Proxy-trust policy derived from config.
    pub fn proxy_policy(&self) -> ProxyTrustPolicy {
        ProxyTrustPolicy {
            trust_proxy_headers: self.config.trust_proxy_headers,
            trust_single_x_forwarded_for: self.config.trust_single_x_forwarded_for,
            trusted_proxy_secret_header: self.config.trusted_proxy_secret_header.clone(),
            trusted_proxy_secret: self.config.trusted_proxy_secret.clone(),
        }
    }

    /// Public base URL for capability URLs in responses.
    pub fn base_url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:8088".to_string())
    }

    /// Fire-and-forget snapshot of one workspace after a mutation.
    pub fn spawn_persist(&self, workspace_id: Uuid) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.persist_workspace(workspace_id).await {
                warn!(%workspace_id, error = %err, "snapshot persist failed");
            }
        });
    }
}

/// Wire up the full state from a store and config.
pub fn build_state(store: Arc<Store>, config: ServiceConfig) -> Arc<AppState> {
    let (audit, _worker) = AuditQueue::start(Arc::clone(&store), config.test_mode);
    let dispatcher = Dispatcher::new(Arc::clone(&store), config.allow_http_webhooks);
    let engine = EngineContext::new(
        Arc::clone(&store),
        audit.clone(),
        Arc::new(dispatcher),
        EngineLimits {
            workspace_quota_bytes: config.max_workspace_storage_bytes,
            file_max_bytes: config.file_max_size_bytes,
        },
    );
    Arc::new(AppState {
        limiter: RateLimiter::subscriptions(config.test_mode),
        metrics: RequestMetrics::new(),
        started_at: Instant::now(),
        audit,
        engine,
        config,
        store,
    })
}
