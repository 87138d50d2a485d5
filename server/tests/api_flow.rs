//! API surface tests: the seed scenarios driven end to end through the
//! router with an in-memory store.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use vigil_core::EngineConfig;
use vigil_server::AppState;
use vigil_store::Store;

fn test_app() -> (Router, Arc<AppState>, tempfile::TempDir) {
    let model_dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.model_dir = model_dir.path().to_path_buf();
    config.token_secret = "test-secret".to_string();

    let state = AppState::init(config, Store::open_in_memory().unwrap());
    (vigil_server::router(Arc::clone(&state)), state, model_dir)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&value).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Register + login a user; returns (access_token, session_token).
async fn login_user(app: &Router, username: &str) -> (String, String) {
    let (status, _) = call(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@x"),
            "password": "pw",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": username, "password": "pw" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["session_token"].as_str().unwrap().to_string(),
    )
}

fn keystroke_batch() -> Value {
    // dwell {80, 90, 85, 95, 88} ms, flights {50, 55, 48, 52} ms
    let dwells = [80.0, 90.0, 85.0, 95.0, 88.0];
    let flights = [50.0, 55.0, 48.0, 52.0];
    let mut records = Vec::new();
    let mut down = 0.0;
    for (i, dwell) in dwells.iter().enumerate() {
        let up = down + dwell;
        records.push(json!({
            "keyCode": format!("Key{i}"),
            "downTs": down,
            "upTs": up,
            "isSpecialKey": false,
        }));
        if i < flights.len() {
            down = up + flights[i];
        }
    }
    Value::Array(records)
}

#[tokio::test]
async fn register_login_me_flow() {
    let (app, _state, _dir) = test_app();
    let (access, session) = login_user(&app, "alice").await;
    assert!(!session.is_empty());

    let (status, body) = call(&app, "GET", "/api/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["email"], "alice@x");
    assert_eq!(body["is_active"], true);
}

#[tokio::test]
async fn duplicate_registration_is_conflict() {
    let (app, _state, _dir) = test_app();
    login_user(&app, "bob").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "username": "bob", "email": "other@x", "password": "pw" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let (app, _state, _dir) = test_app();
    login_user(&app, "carol").await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": "carol", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn keystroke_batch_extracts_reference_features() {
    let (app, state, _dir) = test_app();
    let (_access, session_token) = login_user(&app, "dave").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/behavior/keystroke",
        None,
        Some(json!({
            "eventType": "keystroke",
            "rawData": keystroke_batch(),
            "features": {},
            "sessionToken": session_token,
            "timestamp": 1748779200000_i64,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["features_extracted"].as_u64().unwrap() >= 13);
    // avg_dwell 87.6 -> 8, avg_flight 51.25 -> 5
    assert!(body["behavioral_signature"]
        .as_str()
        .unwrap()
        .starts_with("8_5_"));
    let event_id = body["event_id"].as_i64().unwrap();

    let session = state
        .store
        .active_session_by_token(&session_token)
        .unwrap()
        .unwrap();
    let events = state.store.events_for_session(session.id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, event_id);
    assert!((events[0].features["avg_dwell"] - 87.6).abs() < 1e-9);
    assert!((events[0].features["avg_flight"] - 51.25).abs() < 1e-9);
}

#[tokio::test]
async fn keystroke_with_bad_session_is_unauthorized() {
    let (app, _state, _dir) = test_app();
    let (status, _) = call(
        &app,
        "POST",
        "/api/behavior/keystroke",
        None,
        Some(json!({
            "eventType": "keystroke",
            "rawData": [],
            "features": {},
            "sessionToken": "bogus",
            "timestamp": 1748779200000_i64,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trust_score_without_model_is_neutral() {
    let (app, _state, _dir) = test_app();
    let (access, session_token) = login_user(&app, "erin").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/trust/score",
        Some(&access),
        Some(json!({ "sessionToken": session_token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trust_score"], 0.5);
    assert_eq!(body["trust_level"], "moderate");
    assert_eq!(body["recommended_action"], "increase_monitoring");
    assert!(body.get("error").is_none());
    assert_eq!(
        body["behavioral_analysis"]["message"],
        "No trained model available"
    );
}

#[tokio::test]
async fn terminated_session_refuses_trust_scoring() {
    let (app, _state, _dir) = test_app();
    let (access, session_token) = login_user(&app, "frank").await;

    let (_, report) = call(
        &app,
        "POST",
        "/api/trust/score",
        Some(&access),
        Some(json!({ "sessionToken": session_token })),
    )
    .await;
    let session_id = report["session_id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/api/security/action",
        Some(&access),
        Some(json!({ "sessionId": session_id, "action": "terminate_session" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["action"], "session_terminated");

    // the terminated session no longer resolves: 401
    let (status, _) = call(
        &app,
        "POST",
        "/api/trust/score",
        Some(&access),
        Some(json!({ "sessionToken": session_token })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_action_is_invalid() {
    let (app, _state, _dir) = test_app();
    let (access, _) = login_user(&app, "grace").await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/security/action",
        Some(&access),
        Some(json!({ "sessionId": 1, "action": "self_destruct" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_info_and_activity() {
    let (app, _state, _dir) = test_app();
    let (access, session_token) = login_user(&app, "heidi").await;

    let (_, report) = call(
        &app,
        "POST",
        "/api/trust/score",
        Some(&access),
        Some(json!({ "sessionToken": session_token })),
    )
    .await;
    let session_id = report["session_id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/session/{session_id}"),
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);
    assert!(body["current_trust_score"].as_f64().unwrap() <= 1.0);

    let (status, body) = call(
        &app,
        "PUT",
        "/api/session/activity",
        Some(&access),
        Some(json!({ "sessionToken": session_token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "updated");

    let (status, _) = call(
        &app,
        "PUT",
        "/api/session/activity",
        Some(&access),
        Some(json!({ "sessionToken": "bogus" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn model_status_and_premature_training() {
    let (app, _state, _dir) = test_app();
    let (access, _) = login_user(&app, "ivan").await;

    let (status, body) = call(&app, "GET", "/api/ml/model/status/1", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loaded"], false);

    // one session with no events cannot possibly train
    let (status, body) = call(&app, "POST", "/api/ml/model/train/1", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_kind"], "insufficient_data");
}

#[tokio::test]
async fn logout_terminates_session() {
    let (app, _state, _dir) = test_app();
    let (access, session_token) = login_user(&app, "janet").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/logout",
        Some(&access),
        Some(json!({ "sessionToken": session_token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    // the session no longer resolves after logout
    let (status, _) = call(
        &app,
        "POST",
        "/api/trust/score",
        Some(&access),
        Some(json!({ "sessionToken": session_token })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_probe() {
    let (app, _state, _dir) = test_app();
    let (status, body) = call(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "vigil");
}
