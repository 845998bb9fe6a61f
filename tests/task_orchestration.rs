// SPDX-License-Identifier: MIT OR Apache-2.0
//! The task lifecycle over HTTP: task → claim → claimed → forced expiry →
//! stalled → renew → claimed → response → completed.

mod common;

use axum::http::StatusCode;
use common::{bootstrap, error_code, send, test_app};
use serde_json::json;

async fn task_state(app: &common::TestApp, append_key: &str) -> String {
    let (status, _, body) = send(app, "GET", &format!("/a/{append_key}/tasks"), None, &[]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["tasks"][0]["state"]
        .as_str()
        .unwrap_or("<missing>")
        .to_string()
}

#[tokio::test]
async fn full_task_lifecycle() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    let ws_id = keys.workspace_id.clone();

    send(
        &app,
        "PUT",
        &format!("/w/{}/todo.md", keys.write),
        Some(json!({ "content": "# todo" })),
        &[],
    )
    .await;

    // Post the task.
    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/a/{}/todo.md", keys.append),
        Some(json!({ "author": "planner", "type": "task", "content": "ship it" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["publicId"], "a1");
    assert_eq!(task_state(&app, &keys.append).await, "pending");

    // Claim it.
    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/a/{}/todo.md", keys.append),
        Some(json!({
            "author": "agent-7",
            "type": "claim",
            "ref": "a1",
            "expiresInSeconds": 1800,
        })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["publicId"], "a2");
    assert!(body["data"]["expiresAt"].is_string());
    assert_eq!(task_state(&app, &keys.append).await, "claimed");

    // Force expiry through a negative renew on the owner surface.
    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/workspaces/{ws_id}/orchestration/claims/a2/renew"),
        Some(json!({ "expiresInSeconds": -60 })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(task_state(&app, &keys.append).await, "stalled");

    // A fresh renew brings it back.
    let (status, _, _) = send(
        &app,
        "POST",
        &format!("/workspaces/{ws_id}/orchestration/claims/a2/renew"),
        Some(json!({ "expiresInSeconds": 1800 })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task_state(&app, &keys.append).await, "claimed");

    // Complete.
    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/workspaces/{ws_id}/orchestration/claims/a2/complete"),
        Some(json!({ "content": "done" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["appendId"].is_string());
    assert_eq!(task_state(&app, &keys.append).await, "completed");
}

#[tokio::test]
async fn claim_requires_a_task_ref() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    send(
        &app,
        "PUT",
        &format!("/w/{}/todo.md", keys.write),
        Some(json!({ "content": "" })),
        &[],
    )
    .await;

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/a/{}/todo.md", keys.append),
        Some(json!({ "author": "agent", "type": "claim" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_REQUEST");
}

#[tokio::test]
async fn unknown_claim_id_is_404() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    let (status, _, body) = send(
        &app,
        "POST",
        &format!(
            "/workspaces/{}/orchestration/claims/a99/renew",
            keys.workspace_id
        ),
        Some(json!({})),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "APPEND_NOT_FOUND");
}

#[tokio::test]
async fn block_requires_reason() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    send(
        &app,
        "PUT",
        &format!("/w/{}/todo.md", keys.write),
        Some(json!({ "content": "" })),
        &[],
    )
    .await;
    send(
        &app,
        "POST",
        &format!("/a/{}/todo.md", keys.append),
        Some(json!({ "author": "planner", "type": "task" })),
        &[],
    )
    .await;
    send(
        &app,
        "POST",
        &format!("/a/{}/todo.md", keys.append),
        Some(json!({ "author": "agent", "type": "claim", "ref": "a1" })),
        &[],
    )
    .await;

    let (status, _, body) = send(
        &app,
        "POST",
        &format!(
            "/workspaces/{}/orchestration/claims/a2/block",
            keys.workspace_id
        ),
        Some(json!({})),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_REQUEST");

    let (status, _, _) = send(
        &app,
        "POST",
        &format!(
            "/workspaces/{}/orchestration/claims/a2/block",
            keys.workspace_id
        ),
        Some(json!({ "reason": "blocked on credentials" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn claims_view_reports_lease_status() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    send(
        &app,
        "PUT",
        &format!("/w/{}/work/t.md", keys.write),
        Some(json!({ "content": "" })),
        &[],
    )
    .await;
    send(
        &app,
        "POST",
        &format!("/a/{}/work/t.md", keys.append),
        Some(json!({ "author": "planner", "type": "task", "content": "fix the build" })),
        &[],
    )
    .await;
    send(
        &app,
        "POST",
        &format!("/a/{}/work/t.md", keys.append),
        Some(json!({ "author": "agent-9", "type": "claim", "ref": "a1" })),
        &[],
    )
    .await;

    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/a/{}/claims?folder=/work", keys.append),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let claims = body["data"]["claims"].as_array().unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0]["taskId"], "a1");
    assert_eq!(claims[0]["claimId"], "a2");
    assert_eq!(claims[0]["file"], "/work/t.md");
    assert_eq!(claims[0]["status"], "active");
    assert_eq!(claims[0]["taskContent"], "fix the build");
    assert!(claims[0]["expiresInSeconds"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn task_filters() {
    let app = test_app();
    let keys = bootstrap(&app, "ws").await;
    send(
        &app,
        "PUT",
        &format!("/w/{}/todo.md", keys.write),
        Some(json!({ "content": "" })),
        &[],
    )
    .await;
    send(
        &app,
        "POST",
        &format!("/a/{}/todo.md", keys.append),
        Some(json!({ "author": "p", "type": "task", "priority": "critical" })),
        &[],
    )
    .await;
    send(
        &app,
        "POST",
        &format!("/a/{}/todo.md", keys.append),
        Some(json!({ "author": "p", "type": "task", "priority": "low" })),
        &[],
    )
    .await;

    let (_, _, body) = send(
        &app,
        "GET",
        &format!("/a/{}/tasks?priority=critical", keys.append),
        None,
        &[],
    )
    .await;
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 1);

    let (_, _, body) = send(
        &app,
        "GET",
        &format!("/a/{}/tasks?claimable=true", keys.append),
        None,
        &[],
    )
    .await;
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["stats"]["pending"], 2);

    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/a/{}/tasks?status=bogus", keys.append),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_REQUEST");
}
