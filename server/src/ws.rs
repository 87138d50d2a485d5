//! WebSocket endpoint pushing trust updates to connected clients.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use vigil_core::VigilError;

/// Upgrade `/ws/{session_token}`; the token must belong to a live
/// session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_token): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.store.active_session_by_token(&session_token) {
        Ok(Some(_)) => ws.on_upgrade(move |socket| handle_socket(socket, session_token, state)),
        Ok(None) => {
            ApiError(VigilError::Unauthorized("invalid session token".into())).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

async fn handle_socket(socket: WebSocket, session_token: String, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.connections.register(&session_token, tx);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    // inbound frames are keepalives; nothing to do
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.connections.unregister(&session_token);
    debug!(token = %session_token, "WebSocket closed");
}
