// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `/api/v1` bearer surface: BM25 search and archive export.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::{bootstrap, error_code, send, send_raw, test_app};
use mb_core::{ApiKeyRecord, ApiScope};
use mb_keys::{generate_api_key, hash_key, key_prefix};
use serde_json::json;
use uuid::Uuid;

async fn mint_api_key(app: &common::TestApp, workspace_id: &str, scopes: &str) -> String {
    let plaintext = generate_api_key(false);
    app.store
        .insert_api_key(ApiKeyRecord {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.parse().unwrap(),
            prefix: key_prefix(&plaintext),
            hash: hash_key(&plaintext),
            scopes: ApiScope::parse_set(scopes).unwrap(),
            live: false,
            created_at: Utc::now(),
            expires_at: None,
            revoked_at: None,
        })
        .await;
    plaintext
}

#[tokio::test]
async fn search_requires_bearer_and_scope() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;

    let (status, _, body) = send(&app, "GET", "/api/v1/search?q=x", None, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHORIZED");

    let wrong_scope = mint_api_key(&app, &keys.workspace_id, "export").await;
    let (status, _, body) = send(
        &app,
        "GET",
        "/api/v1/search?q=x",
        None,
        &[("authorization", &format!("Bearer {wrong_scope}"))],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "PERMISSION_DENIED");
}

#[tokio::test]
async fn search_ranks_scoped_content() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    for (path, content) in [
        ("docs/rust.md", "rust rust rust systems language"),
        ("docs/cooking.md", "garlic onions rust never appears wait it did"),
        ("notes/other.md", "rust elsewhere outside the folder"),
    ] {
        send(
            &app,
            "PUT",
            &format!("/w/{}/{path}", keys.write),
            Some(json!({ "content": content })),
            &[],
        )
        .await;
    }

    let api_key = mint_api_key(&app, &keys.workspace_id, "search").await;
    let auth_header = format!("Bearer {api_key}");
    let (status, _, body) = send(
        &app,
        "GET",
        "/api/v1/search?q=rust&folder=/docs",
        None,
        &[("authorization", &auth_header)],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let hits = body["data"]["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    // The heavier document ranks first.
    assert_eq!(hits[0]["path"], "/docs/rust.md");
    assert_eq!(body["data"]["truncated"], false);

    let long_query = "x".repeat(600);
    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/api/v1/search?q={long_query}"),
        None,
        &[("authorization", &auth_header)],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "QUERY_TOO_LONG");
}

#[tokio::test]
async fn export_zip_and_gzip() {
    let app = test_app();
    let keys = bootstrap(&app, "archive").await;
    send(
        &app,
        "PUT",
        &format!("/w/{}/a.md", keys.write),
        Some(json!({ "content": "alpha" })),
        &[],
    )
    .await;
    send(
        &app,
        "PUT",
        &format!("/w/{}/docs/b.md", keys.write),
        Some(json!({ "content": "beta" })),
        &[],
    )
    .await;

    let api_key = mint_api_key(&app, &keys.workspace_id, "*").await;
    let auth_header = format!("Bearer {api_key}");

    let (status, headers, bytes) = send_raw(
        &app,
        "GET",
        "/api/v1/export?format=zip",
        None,
        &[("authorization", &auth_header)],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        "application/zip"
    );
    assert!(
        headers
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("attachment;")
    );
    let checksum = headers.get("x-export-checksum").unwrap().to_str().unwrap();
    assert_eq!(checksum.len(), 64);
    // ZIP magic.
    assert_eq!(&bytes[0..2], b"PK");

    let (status, headers, bytes) = send_raw(
        &app,
        "GET",
        "/api/v1/export?format=gzip",
        None,
        &[("authorization", &auth_header)],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        "application/gzip"
    );
    // gzip magic.
    assert_eq!(&bytes[0..2], &[0x1f, 0x8b]);

    let (status, _, body) = send(
        &app,
        "GET",
        "/api/v1/export?format=tar",
        None,
        &[("authorization", &auth_header)],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_REQUEST");
}
