// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! HTTP + WebSocket transport for the dispatch engine.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with all dispatch routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/passengers/{id}/rides", post(http::create_ride))
        .route("/passengers/{id}/rides/{ride_id}/cancel", post(http::cancel_ride))
        .route("/drivers/{id}/status", put(http::update_driver_status))
        .route("/drivers/{id}/location", put(http::update_driver_location))
        .route("/drivers/{id}/rides/{ride_id}/accept", post(http::accept_ride))
        .route("/drivers/{id}/rides/{ride_id}/reject", post(http::reject_ride))
        .route("/notifications/ws", get(ws::notifications_ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
