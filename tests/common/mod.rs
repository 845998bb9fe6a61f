// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared harness for the end-to-end suites: an in-memory daemon plus
//! request helpers over `tower::ServiceExt::oneshot`.

// Each suite compiles this module independently; not every helper is used
// by every suite.
#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use mb_config::ServiceConfig;
use mb_daemon::{build_app, build_state};
use mb_store::Store;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// A bootstrapped test daemon.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<Store>,
}

/// Build an in-memory daemon in test mode.
pub fn test_app() -> TestApp {
    test_app_with(ServiceConfig {
        base_url: Some("http://md.test".into()),
        test_mode: true,
        ..Default::default()
    })
}

/// Build an in-memory daemon with explicit settings.
pub fn test_app_with(config: ServiceConfig) -> TestApp {
    let store = Arc::new(Store::in_memory());
    let state = build_state(Arc::clone(&store), config);
    TestApp {
        router: build_app(state),
        store,
    }
}

/// Keys returned by a bootstrap call.
pub struct BootstrapKeys {
    pub workspace_id: String,
    pub read: String,
    pub append: String,
    pub write: String,
}

/// Issue a request and decode the JSON body.
pub async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, Value) {
    let (status, resp_headers, bytes) = send_raw(app, method, uri, body, headers).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, resp_headers, value)
}

/// Issue a request and return the raw body bytes.
pub async fn send_raw(
    app: &TestApp,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let resp_headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec();
    (status, resp_headers, bytes)
}

/// Bootstrap a workspace and return its key triple.
pub async fn bootstrap(app: &TestApp, name: &str) -> BootstrapKeys {
    let (status, _, body) = send(
        app,
        "POST",
        "/bootstrap",
        Some(serde_json::json!({ "workspaceName": name })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "bootstrap failed: {body}");
    assert_eq!(body["ok"], true);
    BootstrapKeys {
        workspace_id: body["data"]["workspaceId"].as_str().unwrap().to_string(),
        read: body["data"]["keys"]["read"].as_str().unwrap().to_string(),
        append: body["data"]["keys"]["append"].as_str().unwrap().to_string(),
        write: body["data"]["keys"]["w"].as_str().unwrap().to_string(),
    }
}

/// Shorthand for the error code of a failure envelope.
pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or("")
}
