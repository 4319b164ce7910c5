// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! The notifications WebSocket: drivers and passengers connect here to
//! receive `NotificationEnvelope`s addressed to them.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::state::AppState;
use crate::transport::auth;

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsWsQuery {
    pub token: Option<String>,
    pub recipient_user_id: String,
}

/// `GET /notifications/ws?token=...&recipient_user_id=...`
pub async fn notifications_ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationsWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if auth::validate_query_token(query.token.as_deref(), state.config.auth_token.as_deref()).is_err() {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state, query.recipient_user_id)).into_response()
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>, recipient_user_id: String) {
    let mut rx = state.registry.subscribe(&recipient_user_id).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            envelope = rx.recv() => {
                match envelope {
                    Ok(envelope) => {
                        let wire = envelope.to_wire(&recipient_user_id);
                        let Ok(text) = serde_json::to_string(&wire) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) if text == "ping" => {
                        if ws_tx.send(Message::Text("pong".into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
