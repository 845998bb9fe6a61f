// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP surface for the markbase workspace service.
//!
//! Route taxonomy:
//!
//! * `GET  /r/{key}/…` — read surface (file reads, folder listings, stats);
//! * `GET|POST /a/{key}/…` — append surface (append entries, task and claim
//!   listings, subscriptions, copy / bulk create);
//! * `/w/{key}/…` — write surface (upsert, delete, recover, move, rename,
//!   rotate, share, folders);
//! * `GET /api/v1/…` — `Bearer sk_…` search and export;
//! * `POST /workspaces/{id}/orchestration/claims/{claim_id}/{op}` —
//!   owner-session claim operators;
//! * `POST /bootstrap` — workspace creation.
//!
//! Every response is the `{ok:true,data}` / `{ok:false,error}` envelope.

#![deny(unsafe_code)]

mod handlers;
pub mod middleware;
mod state;

pub use state::{AppState, build_state};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mb_core::{ErrEnvelope, OkEnvelope};
use mb_error::ApiError;
use std::sync::Arc;

/// Newtype so [`ApiError`] can cross the axum boundary.
#[derive(Debug)]
pub struct Failure(pub ApiError);

impl From<ApiError> for Failure {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrEnvelope::new(self.0))).into_response()
    }
}

/// Handler result alias.
pub type HandlerResult = Result<Response, Failure>;

/// Wrap `data` in the success envelope at `status`.
pub(crate) fn ok_response<T: serde::Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(OkEnvelope::new(data))).into_response()
}

/// Build the full router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/bootstrap", post(handlers::bootstrap))
        // Read surface.
        .route("/r/{key}", get(handlers::read_root))
        .route("/r/{key}/{*path}", get(handlers::read_path))
        // Append surface.  Literal segments outrank the wildcard.
        .route("/a/{key}/tasks", get(handlers::list_tasks))
        .route("/a/{key}/claims", get(handlers::list_claims))
        .route(
            "/a/{key}/subscriptions",
            get(handlers::list_subscriptions).post(handlers::create_subscription),
        )
        .route(
            "/a/{key}/subscriptions/{id}",
            axum::routing::delete(handlers::delete_subscription),
        )
        .route("/a/{key}/bulk", post(handlers::bulk_create_files))
        .route("/a/{key}/copy", post(handlers::copy_file))
        .route(
            "/a/{key}/{*path}",
            get(handlers::list_file_appends).post(handlers::post_append),
        )
        // Write surface.
        .route(
            "/w/{key}",
            get(handlers::write_get_root)
                .put(handlers::put_file_root)
                .patch(handlers::rename_file)
                .delete(handlers::delete_file_root),
        )
        .route("/w/{key}/claim", post(handlers::claim_workspace))
        .route("/w/{key}/recover", post(handlers::recover_file))
        .route("/w/{key}/move", post(handlers::move_file))
        .route("/w/{key}/rotate", post(handlers::rotate_keys))
        .route("/w/{key}/share", post(handlers::share))
        .route(
            "/w/{key}/folders",
            post(handlers::create_folder).delete(handlers::delete_folder),
        )
        .route(
            "/w/{key}/{*path}",
            get(handlers::write_get_path)
                .put(handlers::put_file)
                .patch(handlers::patch_file_settings)
                .delete(handlers::delete_file),
        )
        // Admin surface.
        .route("/api/v1/search", get(handlers::api_search))
        .route("/api/v1/export", get(handlers::api_export))
        // Owner-session claim operators.
        .route(
            "/workspaces/{id}/orchestration/claims/{claim_id}/{op}",
            post(handlers::claim_operator),
        )
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::metrics_middleware,
        ))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
