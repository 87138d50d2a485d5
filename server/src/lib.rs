//! # Vigil Server
//!
//! axum HTTP + WebSocket transport over the trust engine. The server is
//! a thin boundary: request parsing, bearer auth, error-to-status
//! mapping, and WebSocket push. All scoring and state logic lives in
//! the engine and model crates.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use vigil_core::Result;

/// Assemble the full API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/auth/register", post(routes::register))
        .route("/api/auth/login", post(routes::login))
        .route("/api/auth/me", get(routes::me))
        .route("/api/auth/logout", post(routes::logout))
        .route("/api/behavior/keystroke", post(routes::ingest_keystrokes))
        .route("/api/behavior/mouse", post(routes::ingest_mouse))
        .route("/api/trust/score", post(routes::trust_score))
        .route("/api/security/action", post(routes::security_action))
        .route("/api/ml/model/status/{user_id}", get(routes::model_status))
        .route("/api/ml/model/train/{user_id}", post(routes::train_model))
        .route("/api/session/{session_id}", get(routes::session_info))
        .route("/api/session/activity", put(routes::update_activity))
        .route("/api/health", get(routes::health))
        .route("/ws/{session_token}", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "Vigil listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
