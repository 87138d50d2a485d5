//! HTTP handlers for the Vigil API surface.

use crate::auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use vigil_behavior::{behavioral_signature, keystroke, pointer, RawKeystroke, RawPointerEvent};
use vigil_core::{EventKind, SecurityAction, User, VigilError};
use vigil_engine::{execute_action, TrustReport};
use vigil_model::train_user;

/// Soft deadline for one trust calculation.
const TRUST_DEADLINE_MS: u64 = 500;

/// Resolve the bearer token to a registered user.
fn current_user(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let username = auth::bearer_username(headers, &state.config.token_secret)?;
    state
        .store
        .user_by_username(&username)?
        .ok_or_else(|| ApiError(VigilError::Unauthorized("unknown user".into())))
}

// ============================================================================
// Authentication
// ============================================================================

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<Json<Value>> {
    if body.username.is_empty() || body.email.is_empty() || body.password.is_empty() {
        return Err(ApiError(VigilError::Invalid(
            "username, email, and password are required".into(),
        )));
    }
    if state.store.user_by_username(&body.username)?.is_some() {
        return Err(ApiError(VigilError::Conflict(
            "username already registered".into(),
        )));
    }
    if state.store.user_by_email(&body.email)?.is_some() {
        return Err(ApiError(VigilError::Conflict(
            "email already registered".into(),
        )));
    }

    let password = body.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| ApiError(VigilError::Internal(e.to_string())))??;

    let user = state
        .store
        .create_user(&body.username, &body.email, &password_hash, Utc::now())?;

    Ok(Json(json!({
        "message": "user registered successfully",
        "user_id": user.id,
        "username": user.username,
    })))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let user = state
        .store
        .user_by_username(&body.username)?
        .filter(|u| u.is_active)
        .ok_or_else(|| {
            ApiError(VigilError::Unauthorized(
                "incorrect username or password".into(),
            ))
        })?;

    let password = body.password.clone();
    let hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError(VigilError::Internal(e.to_string())))?;
    if !verified {
        return Err(ApiError(VigilError::Unauthorized(
            "incorrect username or password".into(),
        )));
    }

    let now = Utc::now();
    let access_token = auth::issue_token(
        &user.username,
        &state.config.token_secret,
        state.config.token_expiry_min,
        now,
    )?;
    let session_token = auth::generate_session_token();
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    state
        .store
        .create_session(user.id, &session_token, None, user_agent, now)?;

    Ok(Json(json!({
        "access_token": access_token,
        "session_token": session_token,
        "token_type": "bearer",
        "user_id": user.id,
        "username": user.username,
    })))
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = current_user(&state, &headers)?;
    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "is_active": user.is_active,
        "created_at": user.created_at,
    })))
}

#[derive(Deserialize, Default)]
pub struct LogoutRequest {
    #[serde(rename = "sessionToken", default)]
    pub session_token: Option<String>,
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LogoutRequest>,
) -> ApiResult<Json<Value>> {
    current_user(&state, &headers)?;
    if let Some(token) = &body.session_token {
        if let Some(session) = state.store.active_session_by_token(token)? {
            state.store.terminate_session(session.id)?;
        }
    }
    Ok(Json(json!({ "ok": true, "message": "logged out successfully" })))
}

// ============================================================================
// Behavioral ingestion
// ============================================================================

#[derive(Deserialize)]
pub struct BehaviorRequest {
    #[serde(rename = "eventType", default)]
    pub event_type: String,
    #[serde(rename = "rawData")]
    pub raw_data: Value,
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    #[serde(rename = "sessionToken")]
    pub session_token: String,
    /// Client capture time, milliseconds since the epoch.
    pub timestamp: i64,
}

fn event_timestamp(ms: i64) -> ApiResult<chrono::DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ApiError(VigilError::Invalid(format!("bad timestamp {ms}"))))
}

pub async fn ingest_keystrokes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BehaviorRequest>,
) -> ApiResult<Json<Value>> {
    let session = state
        .store
        .active_session_by_token(&body.session_token)?
        .ok_or_else(|| ApiError(VigilError::Unauthorized("invalid session token".into())))?;

    let raw: Vec<RawKeystroke> = serde_json::from_value(body.raw_data.clone())
        .map_err(|e| ApiError(VigilError::Invalid(format!("bad keystroke payload: {e}"))))?;

    let mut features = body.features.clone();
    features.extend(keystroke::extract_features(&raw));
    let signature = behavioral_signature(&features);

    let raw_json = serde_json::to_string(&body.raw_data)?;
    let event_id = state.store.append_event(
        session.id,
        EventKind::Keystroke,
        &raw_json,
        &features,
        event_timestamp(body.timestamp)?,
        None,
        false,
    )?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("processed {} keystroke events", raw.len()),
        "features_extracted": features.len(),
        "behavioral_signature": signature,
        "event_id": event_id,
    })))
}

pub async fn ingest_mouse(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BehaviorRequest>,
) -> ApiResult<Json<Value>> {
    let session = state
        .store
        .active_session_by_token(&body.session_token)?
        .ok_or_else(|| ApiError(VigilError::Unauthorized("invalid session token".into())))?;

    let raw: Vec<RawPointerEvent> = serde_json::from_value(body.raw_data.clone())
        .map_err(|e| ApiError(VigilError::Invalid(format!("bad pointer payload: {e}"))))?;

    let mut features = body.features.clone();
    features.extend(pointer::extract_features(&raw));

    let raw_json = serde_json::to_string(&body.raw_data)?;
    let event_id = state.store.append_event(
        session.id,
        EventKind::Pointer,
        &raw_json,
        &features,
        event_timestamp(body.timestamp)?,
        None,
        false,
    )?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("processed {} mouse events", raw.len()),
        "features_extracted": features.len(),
        "event_id": event_id,
    })))
}

// ============================================================================
// Trust engine
// ============================================================================

#[derive(Deserialize)]
pub struct TrustScoreRequest {
    #[serde(rename = "sessionToken")]
    pub session_token: String,
}

pub async fn trust_score(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TrustScoreRequest>,
) -> ApiResult<Json<TrustReport>> {
    current_user(&state, &headers)?;
    let session = state
        .store
        .active_session_by_token(&body.session_token)?
        .ok_or_else(|| ApiError(VigilError::Unauthorized("invalid or expired session".into())))?;

    let engine = Arc::clone(&state.engine);
    let store = Arc::clone(&state.store);
    let session_id = session.id;
    let now = Utc::now();

    let calculation = tokio::task::spawn_blocking(move || engine.calculate(&store, session_id, now));
    let report = match tokio::time::timeout(
        Duration::from_millis(TRUST_DEADLINE_MS),
        calculation,
    )
    .await
    {
        Ok(Ok(report)) => report,
        Ok(Err(join_error)) => {
            warn!(session_id, error = %join_error, "Trust calculation task failed");
            TrustReport::fallback(session_id, now, "calculation task failed")
        }
        Err(_) => {
            warn!(session_id, "Trust calculation exceeded deadline");
            TrustReport::fallback(session_id, now, "timeout")
        }
    };

    state.connections.send_to(
        &body.session_token,
        &json!({ "type": "trust_update", "data": report }),
    );

    Ok(Json(report))
}

#[derive(Deserialize)]
pub struct SecurityActionRequest {
    #[serde(rename = "sessionId")]
    pub session_id: i64,
    pub action: String,
}

pub async fn security_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SecurityActionRequest>,
) -> ApiResult<Json<Value>> {
    current_user(&state, &headers)?;
    let action = SecurityAction::parse(&body.action)
        .ok_or_else(|| ApiError(VigilError::Invalid(format!("unknown action {:?}", body.action))))?;

    let result = execute_action(&state.store, body.session_id, action, Utc::now())?;
    Ok(Json(json!({
        "success": result.success,
        "action": result.action,
        "message": result.message,
    })))
}

// ============================================================================
// Model management
// ============================================================================

pub async fn model_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    current_user(&state, &headers)?;
    let status = state.predictor.model_status(user_id);
    Ok(Json(serde_json::to_value(status)?))
}

pub async fn train_model(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    current_user(&state, &headers)?;
    if state.store.user_by_id(user_id)?.is_none() {
        return Err(ApiError(VigilError::NotFound(format!("user {user_id}"))));
    }

    let store = Arc::clone(&state.store);
    let config = Arc::clone(&state.config);
    let now = Utc::now();
    let report = tokio::task::spawn_blocking(move || train_user(&store, &config, user_id, now))
        .await
        .map_err(|e| ApiError(VigilError::Internal(e.to_string())))??;

    // a fresh bundle invalidates whatever the cache held
    if report.success {
        state.predictor.evict(user_id);
    }

    // training failures are structured diagnostics, not transport errors
    Ok(Json(serde_json::to_value(report)?))
}

// ============================================================================
// Sessions & health
// ============================================================================

pub async fn session_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    current_user(&state, &headers)?;
    let session = state
        .store
        .session_by_id(session_id)?
        .ok_or_else(|| ApiError(VigilError::NotFound(format!("session {session_id}"))))?;

    Ok(Json(json!({
        "id": session.id,
        "user_id": session.user_id,
        "current_trust_score": session.current_trust,
        "min_trust_threshold": session.min_trust_threshold,
        "login_time": session.login_time,
        "last_activity": session.last_activity,
        "is_active": session.is_active,
    })))
}

#[derive(Deserialize)]
pub struct ActivityRequest {
    #[serde(rename = "sessionToken")]
    pub session_token: String,
}

pub async fn update_activity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ActivityRequest>,
) -> ApiResult<Json<Value>> {
    current_user(&state, &headers)?;
    let session = state
        .store
        .active_session_by_token(&body.session_token)?
        .ok_or_else(|| ApiError(VigilError::NotFound("session not found".into())))?;

    state.store.touch_activity(session.id, Utc::now())?;
    Ok(Json(json!({ "status": "updated" })))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "vigil",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
