mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{TestApp, build_test_app, get_request, json_request};
use serde_json::{Value, json};

async fn create_log(app: &TestApp, creator: &str, assignees: &[&str]) -> String {
    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/action-logs",
            creator,
            json!({
                "title": "Quarterly budget review",
                "description": "Compile unit submissions",
                "assigned_to": assignees,
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().expect("log id").to_string()
}

async fn request_closure(app: &TestApp, log_id: &str, actor: &str) -> Value {
    let (status, body) = app
        .send(json_request(
            "PATCH",
            &format!("/v1/action-logs/{log_id}"),
            actor,
            json!({"status": "closed"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

#[tokio::test]
async fn commissioner_assignment_enters_at_commissioner_stage() {
    let app = build_test_app().await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;

    let log_id = create_log(&app, "boss", &["eco1"]).await;
    let body = request_closure(&app, &log_id, "eco1").await;

    assert_eq!(body["status"], "pending_approval");
    assert_eq!(body["closure_approval_stage"], "commissioner");
    assert_eq!(body["closure_requested_by"], "eco1");
    assert_eq!(body["original_assigner"], "boss");
}

#[tokio::test]
async fn peer_assignment_enters_at_unit_head_stage() {
    let app = build_test_app().await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;

    let log_id = create_log(&app, "eco2", &["eco1"]).await;
    let body = request_closure(&app, &log_id, "eco1").await;

    assert_eq!(body["status"], "pending_approval");
    assert_eq!(body["closure_approval_stage"], "unit_head");
}

#[tokio::test]
async fn unit_head_approval_requires_unit_alignment() {
    let app = build_test_app().await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("head_b", "economist", "Head of Trade Unit", Some("d1"), Some("unit-b")).await;
    app.seed_user("head_a", "economist", "Head of Macro Unit", Some("d1"), Some("unit-a")).await;

    let log_id = create_log(&app, "eco2", &["eco1"]).await;
    request_closure(&app, &log_id, "eco1").await;

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "head_b",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["code"], "forbidden");
    assert!(body["message"].as_str().unwrap().contains("unit_head"));

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "head_a",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "pending_approval");
    assert_eq!(body["closure_approval_stage"], "assistant_commissioner");
}

#[tokio::test]
async fn approval_chain_advances_stage_by_stage_to_close() {
    let app = build_test_app().await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("head_a", "economist", "Head of Macro Unit", Some("d1"), Some("unit-a")).await;
    app.seed_user("ac", "assistant_commissioner", "", Some("d1"), None).await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;

    let log_id = create_log(&app, "eco2", &["eco1"]).await;
    request_closure(&app, &log_id, "eco1").await;

    let (_, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "head_a",
            json!({}),
        ))
        .await;
    assert_eq!(body["closure_approval_stage"], "assistant_commissioner");

    let (_, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "ac",
            json!({}),
        ))
        .await;
    assert_eq!(body["closure_approval_stage"], "commissioner");

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "boss",
            json!({"comment": "Well done"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "closed");
    assert_eq!(body["closure_approval_stage"], "closed");

    // The approval comment carries the post-transition status.
    let (_, comments) = app
        .send(get_request(&format!("/v1/action-logs/{log_id}/comments"), "boss"))
        .await;
    let approval = comments
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["comment"] == "Well done")
        .expect("approval comment recorded");
    assert_eq!(approval["is_approved"], true);
    assert_eq!(approval["status"], "closed");
}

#[tokio::test]
async fn top_delegate_short_circuits_from_unit_head() {
    let app = build_test_app().await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("top", "commissioner", "Ag. C/PAP", Some("d1"), Some("unit-a")).await;

    let log_id = create_log(&app, "eco2", &["eco1"]).await;
    request_closure(&app, &log_id, "eco1").await;

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "top",
            json!({"comment": "Approved and closed"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "closed");
    assert_eq!(body["closure_approval_stage"], "closed");
}

#[tokio::test]
async fn top_delegate_on_leave_advances_exactly_one_stage() {
    let app = build_test_app().await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("top", "commissioner", "Ag. C/PAP", Some("d1"), Some("unit-a")).await;
    app.seed_user("deputy", "assistant_commissioner", "Ag. AC/PAP", Some("d1"), None).await;

    let expires = Utc::now() + Duration::days(7);
    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/delegations",
            "top",
            json!({
                "delegated_to": "deputy",
                "reason": "leave",
                "expires_at": expires.to_rfc3339(),
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let log_id = create_log(&app, "eco2", &["eco1"]).await;
    request_closure(&app, &log_id, "eco1").await;

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "top",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "pending_approval");
    assert_eq!(body["closure_approval_stage"], "assistant_commissioner");

    // The deputized delegate finalizes in one step.
    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "deputy",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "closed");
    assert_eq!(body["closure_approval_stage"], "closed");
}

#[tokio::test]
async fn unassigned_ticket_is_closable_via_fallback() {
    let app = build_test_app().await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;
    app.seed_user("top", "commissioner", "Ag. C/PAP", Some("d1"), None).await;

    // No assignees: no assignment history, no first-assignee unit to gate on.
    let (status, log) = app
        .send(json_request(
            "POST",
            "/v1/action-logs",
            "boss",
            json!({"title": "Standing directive"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{log}");
    let log_id = log["id"].as_str().unwrap().to_string();

    let body = request_closure(&app, &log_id, "boss").await;
    assert_eq!(body["closure_approval_stage"], "unit_head");

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "top",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "closed");
    assert_eq!(body["closure_approval_stage"], "closed");
}

#[tokio::test]
async fn approve_outside_the_chain_is_a_conflict() {
    let app = build_test_app().await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;

    let log_id = create_log(&app, "boss", &["eco1"]).await;

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "boss",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn reject_at_unit_head_returns_ticket_to_requester() {
    let app = build_test_app().await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;

    let log_id = create_log(&app, "eco2", &["eco1"]).await;
    request_closure(&app, &log_id, "eco1").await;

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/reject"),
            "boss",
            json!({"comment": "Evidence missing"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["closure_approval_stage"], "none");

    let (_, comments) = app
        .send(get_request(&format!("/v1/action-logs/{log_id}/comments"), "boss"))
        .await;
    let rejection = comments
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["comment"] == "Evidence missing")
        .expect("rejection comment recorded");
    assert_eq!(rejection["is_approved"], false);
}

#[tokio::test]
async fn reject_requires_approval_authority() {
    let app = build_test_app().await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;

    let log_id = create_log(&app, "eco2", &["eco1"]).await;
    request_closure(&app, &log_id, "eco1").await;

    let (status, body) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/reject"),
            "eco2",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
async fn closed_log_rejects_further_updates() {
    let app = build_test_app().await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;

    let log_id = create_log(&app, "boss", &["eco1"]).await;
    request_closure(&app, &log_id, "eco1").await;

    let (status, _) = app
        .send(json_request(
            "POST",
            &format!("/v1/action-logs/{log_id}/approve"),
            "boss",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(json_request(
            "PATCH",
            &format!("/v1/action-logs/{log_id}"),
            "eco1",
            json!({"description": "late edit"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn leave_delegation_round_trip_flips_can_approve() {
    let app = build_test_app().await;
    app.seed_user("top", "commissioner", "Ag. C/PAP", Some("d1"), None).await;
    app.seed_user("deputy", "assistant_commissioner", "Ag. AC/PAP", Some("d1"), None).await;

    let log_id = create_log(&app, "top", &["deputy"]).await;
    let log_uri = format!("/v1/action-logs/{log_id}");

    let (_, body) = app.send(get_request(&log_uri, "top")).await;
    assert_eq!(body["can_approve"], true);
    assert_eq!(body["effective_approver"], "top");
    let (_, body) = app.send(get_request(&log_uri, "deputy")).await;
    assert_eq!(body["can_approve"], false);
    assert_eq!(body["effective_approver"], Value::Null);

    let expires = Utc::now() + Duration::days(7);
    let (status, created) = app
        .send(json_request(
            "POST",
            "/v1/delegations",
            "top",
            json!({
                "delegated_to": "deputy",
                "reason": "leave",
                "expires_at": expires.to_rfc3339(),
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["effective_approver"], "deputy");

    // While on leave the top tier's authority points at the deputy.
    let (_, body) = app.send(get_request(&log_uri, "top")).await;
    assert_eq!(body["can_approve"], false);
    assert_eq!(body["effective_approver"], "deputy");
    let (_, body) = app.send(get_request(&log_uri, "deputy")).await;
    assert_eq!(body["can_approve"], true);
    assert_eq!(body["effective_approver"], "deputy");

    let delegation_id = created["id"].as_str().unwrap();
    let (status, _) = app
        .send(json_request(
            "POST",
            &format!("/v1/delegations/{delegation_id}/revoke"),
            "top",
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.send(get_request(&log_uri, "top")).await;
    assert_eq!(body["can_approve"], true);
    let (_, body) = app.send(get_request(&log_uri, "deputy")).await;
    assert_eq!(body["can_approve"], false);
}

#[tokio::test]
async fn expired_leave_delegation_confers_no_authority() {
    let app = build_test_app().await;
    app.seed_user("top", "commissioner", "Ag. C/PAP", Some("d1"), None).await;
    app.seed_user("deputy", "assistant_commissioner", "Ag. AC/PAP", Some("d1"), None).await;

    let expired = Utc::now() - Duration::days(1);
    let (status, created) = app
        .send(json_request(
            "POST",
            "/v1/delegations",
            "top",
            json!({
                "delegated_to": "deputy",
                "reason": "leave",
                "expires_at": expired.to_rfc3339(),
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["is_active"], false);
    assert_eq!(created["is_valid"], false);
    assert_eq!(created["effective_approver"], "top");

    let log_id = create_log(&app, "top", &["deputy"]).await;
    let log_uri = format!("/v1/action-logs/{log_id}");

    // Expired grant: the grantor keeps authority, the grantee never gains it.
    let (_, body) = app.send(get_request(&log_uri, "top")).await;
    assert_eq!(body["can_approve"], true);
    let (_, body) = app.send(get_request(&log_uri, "deputy")).await;
    assert_eq!(body["can_approve"], false);
}

#[tokio::test]
async fn create_validates_title_due_date_and_team_leader() {
    let app = build_test_app().await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;

    let (status, _) = app
        .send(json_request(
            "POST",
            "/v1/action-logs",
            "boss",
            json!({"title": "   "}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let past = Utc::now() - Duration::days(3);
    let (status, _) = app
        .send(json_request(
            "POST",
            "/v1/action-logs",
            "boss",
            json!({"title": "Task", "due_date": past.to_rfc3339()}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(json_request(
            "POST",
            "/v1/action-logs",
            "boss",
            json!({"title": "Task", "assigned_to": ["eco1"], "team_leader": "eco2"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Two or more assignees with no leader supplied: first assignee leads.
    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/action-logs",
            "boss",
            json!({"title": "Task", "assigned_to": ["eco1", "eco2"]}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["team_leader"], "eco1");
}

#[tokio::test]
async fn reassignment_appends_history_and_redrives_lineage() {
    let app = build_test_app().await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;
    app.seed_user("eco2", "economist", "Economist", Some("d1"), Some("unit-a")).await;

    let log_id = create_log(&app, "boss", &["eco1"]).await;

    let (status, body) = app
        .send(json_request(
            "PATCH",
            &format!("/v1/action-logs/{log_id}"),
            "boss",
            json!({"assigned_to": ["eco2"], "comment": "handing over"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["assigned_to"], json!(["eco2"]));

    let (_, history) = app
        .send(get_request(&format!("/v1/action-logs/{log_id}/assignment-history"), "boss"))
        .await;
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["assigned_to"], json!(["eco1"]));
    assert_eq!(entries[1]["assigned_to"], json!(["eco2"]));
    assert_eq!(entries[1]["comment"], "handing over");

    // The oldest record still anchors the approval chain.
    let body = request_closure(&app, &log_id, "eco2").await;
    assert_eq!(body["closure_approval_stage"], "commissioner");
}

#[tokio::test]
async fn pending_approval_cannot_be_set_directly() {
    let app = build_test_app().await;
    app.seed_user("boss", "commissioner", "", Some("d1"), None).await;
    app.seed_user("eco1", "economist", "Economist", Some("d1"), Some("unit-a")).await;

    let log_id = create_log(&app, "boss", &["eco1"]).await;

    let (status, body) = app
        .send(json_request(
            "PATCH",
            &format!("/v1/action-logs/{log_id}"),
            "eco1",
            json!({"status": "pending_approval"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (_, body) = app.send(get_request(&format!("/v1/action-logs/{log_id}"), "eco1")).await;
    assert_eq!(body["status"], "open");
    assert_eq!(body["closure_approval_stage"], "none");
}

#[tokio::test]
async fn unknown_actor_is_unauthorized() {
    let app = build_test_app().await;

    let (status, _) = app.send(get_request("/v1/action-logs", "ghost")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/v1/action-logs")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
