// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bootstrap → write → read, conditional updates, and idempotent creates
//! over the HTTP surface.

mod common;

use axum::http::StatusCode;
use common::{bootstrap, error_code, send, test_app};
use serde_json::json;

#[tokio::test]
async fn bootstrap_write_read() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;

    let (status, _, body) = send(
        &app,
        "PUT",
        &format!("/w/{}/hello.md", keys.write),
        Some(json!({ "content": "hi" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["size"], 2);
    let etag = body["data"]["etag"].as_str().unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let (status, headers, body) = send(
        &app,
        "GET",
        &format!("/r/{}/hello.md", keys.read),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content"], "hi");
    assert_eq!(body["data"]["etag"].as_str().unwrap(), etag);
    assert_eq!(headers.get("etag").unwrap().to_str().unwrap(), etag);
}

#[tokio::test]
async fn bootstrap_returns_urls_once() {
    let app = test_app();
    let (status, _, body) = send(
        &app,
        "POST",
        "/bootstrap",
        Some(json!({ "workspaceName": "docs" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let urls = &body["data"]["urls"];
    let read_key = body["data"]["keys"]["read"].as_str().unwrap();
    assert_eq!(
        urls["read"].as_str().unwrap(),
        format!("http://md.test/r/{read_key}")
    );
    // Root workspace keys are bare base62.
    assert!(read_key.len() >= 22);
    assert!(read_key.bytes().all(|b| b.is_ascii_alphanumeric()));
}

#[tokio::test]
async fn conditional_update_with_if_match() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    let path = format!("/w/{}/doc.md", keys.write);

    let (_, _, body) = send(&app, "PUT", &path, Some(json!({ "content": "hi" })), &[]).await;
    let old_etag = body["data"]["etag"].as_str().unwrap().to_string();

    // Update with the current ETag succeeds.
    let (status, _, body) = send(
        &app,
        "PUT",
        &path,
        Some(json!({ "content": "ho" })),
        &[("if-match", &old_etag)],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Replaying the stale ETag fails with 412 CONFLICT.
    let (status, _, body) = send(
        &app,
        "PUT",
        &path,
        Some(json!({ "content": "hey" })),
        &[("if-match", &old_etag)],
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(error_code(&body), "CONFLICT");

    let (_, _, body) = send(
        &app,
        "GET",
        &format!("/r/{}/doc.md", keys.read),
        None,
        &[],
    )
    .await;
    assert_eq!(body["data"]["content"], "ho");
}

#[tokio::test]
async fn idempotent_create_replays_the_stored_envelope() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    let uri = format!("/w/{}/a.md", keys.write);
    let headers = [("idempotency-key", "tok-123")];

    let (status_a, _, body_a) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({ "content": "first" })),
        &headers,
    )
    .await;
    let (status_b, replay_headers, body_b) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({ "content": "second attempt, same token" })),
        &headers,
    )
    .await;

    assert_eq!(status_a, StatusCode::CREATED);
    assert_eq!(status_b, StatusCode::CREATED);
    assert_eq!(body_a, body_b);
    assert_eq!(
        replay_headers
            .get("idempotency-replayed")
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );

    // Exactly one file exists, with the first write's content.
    let (_, _, body) = send(&app, "GET", &format!("/r/{}/a.md", keys.read), None, &[]).await;
    assert_eq!(body["data"]["content"], "first");
}

#[tokio::test]
async fn soft_delete_recover_roundtrip() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    send(
        &app,
        "PUT",
        &format!("/w/{}/keep.md", keys.write),
        Some(json!({ "content": "data" })),
        &[],
    )
    .await;

    // Mint a file-scoped write key via share.
    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/w/{}/share", keys.write),
        Some(json!({ "path": "/keep.md", "permission": "write" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let file_key = body["data"]["key"].as_str().unwrap().to_string();
    assert!(file_key.starts_with("w_"));

    let (status, _, body) = send(
        &app,
        "DELETE",
        &format!("/w/{}/keep.md", keys.write),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["recoverable"], true);
    assert!(body["data"]["expiresAt"].is_string());

    // Reading the deleted file answers 410.
    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/r/{}/keep.md", keys.read),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(error_code(&body), "FILE_DELETED");

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/w/{file_key}/recover"),
        Some(json!({})),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["path"], "/keep.md");

    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/r/{}/keep.md", keys.read),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content"], "data");
}

#[tokio::test]
async fn folder_listing_after_writes() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    for (path, content) in [("docs/a.md", "alpha"), ("docs/sub/b.md", "beta"), ("top.md", "t")] {
        let (status, _, body) = send(
            &app,
            "PUT",
            &format!("/w/{}/{path}", keys.write),
            Some(json!({ "content": content })),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (status, _, body) = send(&app, "GET", &format!("/r/{}", keys.read), None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"]["entries"].as_array().unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"docs"));
    assert!(names.contains(&"top.md"));

    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/r/{}/docs?recursive=true", keys.read),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"]["entries"].as_array().unwrap();
    let files: Vec<&str> = entries
        .iter()
        .filter(|e| e["kind"] == "file")
        .map(|e| e["path"].as_str().unwrap())
        .collect();
    assert_eq!(files, vec!["/docs/a.md", "/docs/sub/b.md"]);
}

#[tokio::test]
async fn parsed_format_splits_frontmatter() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    send(
        &app,
        "PUT",
        &format!("/w/{}/post.md", keys.write),
        Some(json!({ "content": "---\ntitle: Hello\ndraft: true\n---\n# Body\n" })),
        &[],
    )
    .await;

    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/r/{}/post.md?format=parsed", keys.read),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["frontmatter"]["title"], "Hello");
    assert_eq!(body["data"]["frontmatter"]["draft"], true);
    assert_eq!(body["data"]["body"], "# Body\n");
}
