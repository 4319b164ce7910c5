// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! HTTP handlers for the ride/driver surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::events::{NewRideEvent, NotificationEnvelope, ORDER_EVENTS_STREAM, PROPOSAL_TIMEOUTS_KEY};
use crate::presence::DriverStatus as PresenceStatus;
use crate::pricing::calculate_price_and_eta;
use crate::ride::Ride;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRideRequest {
    pub pickup_x: i64,
    pub pickup_y: i64,
    pub dropoff_x: i64,
    pub dropoff_y: i64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriverStatusRequest {
    Available { x: i64, y: i64 },
    Offline,
}

#[derive(Debug, Deserialize)]
pub struct DriverLocationRequest {
    pub x: i64,
    pub y: i64,
}

/// `GET /api/v1/health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned() })
}

/// `POST /passengers/{id}/rides` — create a ride and enqueue it for matching.
pub async fn create_ride(
    State(s): State<Arc<AppState>>,
    Path(passenger_id): Path<String>,
    Json(req): Json<CreateRideRequest>,
) -> impl IntoResponse {
    if !s.config.in_bounds(req.pickup_x, req.pickup_y) || !s.config.in_bounds(req.dropoff_x, req.dropoff_y) {
        return DispatchError::InvalidCoordinate.to_http_response("coordinate out of grid bounds").into_response();
    }

    let estimate = calculate_price_and_eta(
        &s.config,
        (req.pickup_x, req.pickup_y),
        (req.dropoff_x, req.dropoff_y),
    );

    let ride = match s
        .rides
        .create(
            &passenger_id,
            (req.pickup_x, req.pickup_y),
            (req.dropoff_x, req.dropoff_y),
            estimate.fare,
            estimate.eta_secs,
        )
        .await
    {
        Ok(ride) => ride,
        Err(e) => return e.to_http_response("failed to create ride").into_response(),
    };

    let event = NewRideEvent {
        ride_id: ride.ride_id.clone(),
        pickup_x: req.pickup_x,
        pickup_y: req.pickup_y,
        end_x: req.dropoff_x,
        end_y: req.dropoff_y,
        price: estimate.fare,
        exclude_driver_ids: Vec::new(),
    };
    if let Err(e) = s.substrate.xadd(ORDER_EVENTS_STREAM, &event.to_fields()).await {
        tracing::warn!(ride_id = %ride.ride_id, error = %e, "failed to enqueue ride for matching");
        return e.to_http_response("failed to enqueue ride").into_response();
    }

    (StatusCode::CREATED, Json(ride)).into_response()
}

/// `PUT /drivers/{id}/status`
pub async fn update_driver_status(
    State(s): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Json(req): Json<DriverStatusRequest>,
) -> impl IntoResponse {
    let result = match req {
        DriverStatusRequest::Available { x, y } => {
            s.presence
                .heartbeat(&driver_id, x, y, PresenceStatus::Available, |x, y| s.config.in_bounds(x, y))
                .await
        }
        DriverStatusRequest::Offline => {
            s.presence.heartbeat(&driver_id, 0, 0, PresenceStatus::Offline, |_, _| true).await
        }
    };

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.to_http_response("failed to update driver status").into_response(),
    }
}

/// `PUT /drivers/{id}/location`
pub async fn update_driver_location(
    State(s): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Json(req): Json<DriverLocationRequest>,
) -> impl IntoResponse {
    match s
        .presence
        .heartbeat(&driver_id, req.x, req.y, PresenceStatus::Available, |x, y| s.config.in_bounds(x, y))
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.to_http_response("failed to update driver location").into_response(),
    }
}

/// `POST /drivers/{id}/rides/{ride_id}/accept`
///
/// The ride's `pending -> driver_assigned` transition is the precondition
/// check that matters here (it is what a passenger's concurrent cancel
/// races against), so it runs before the lock is promoted: promoting the
/// lock first and then losing the ride-state race would strand an
/// `assigned:` marker (no TTL) on a cancelled ride with nothing left to
/// release it.
pub async fn accept_ride(
    State(s): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(String, String)>,
) -> impl IntoResponse {
    if s.lock.get_lock(&driver_id).await.unwrap_or(None).as_deref() != Some(ride_id.as_str()) {
        return DispatchError::StateConflict
            .to_http_response("proposal already resolved or expired")
            .into_response();
    }

    let ride = match s.rides.assign(&ride_id, &driver_id).await {
        Ok(ride) => ride,
        Err(e) => return e.to_http_response("failed to accept ride").into_response(),
    };

    if !s.lock.reassign(&driver_id, &ride_id).await.unwrap_or(false) {
        // The proposal's lock was released (e.g. by the reaper) in the gap
        // between the precondition check above and this promotion; the ride
        // is already assigned, so only the driver lock's bookkeeping is
        // stale. Recorded for operators; not surfaced as a failure to the
        // caller since the assignment itself succeeded.
        tracing::warn!(ride_id = %ride_id, driver_id = %driver_id, "lock vanished after ride was assigned");
    }
    let _ = s
        .substrate
        .zrem(PROPOSAL_TIMEOUTS_KEY, &[format!("{ride_id}:{driver_id}")])
        .await;

    let _ = s.bus.publish(&ride.passenger_id, NotificationEnvelope::ProposalAccepted { ride_id, driver_id }).await;
    (StatusCode::OK, Json(ride)).into_response()
}

/// `POST /drivers/{id}/rides/{ride_id}/reject`
pub async fn reject_ride(
    State(s): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(String, String)>,
) -> impl IntoResponse {
    if !s.lock.release_if(&driver_id, &ride_id).await.unwrap_or(false) {
        return DispatchError::StateConflict
            .to_http_response("proposal already resolved or expired")
            .into_response();
    }
    let _ = s
        .substrate
        .zrem(PROPOSAL_TIMEOUTS_KEY, &[format!("{ride_id}:{driver_id}")])
        .await;

    match s.rides.reject(&ride_id).await {
        // Excluding the rejecting driver is best-effort (another retry could
        // still land it back here), but avoids immediately re-proposing to
        // the one driver that just turned the ride down.
        Ok(ride) => reenqueue_and_respond(&s, ride, vec![driver_id]).await,
        Err(e) => e.to_http_response("failed to reject ride").into_response(),
    }
}

async fn reenqueue_and_respond(
    s: &Arc<AppState>,
    ride: Ride,
    exclude_driver_ids: Vec<String>,
) -> axum::response::Response {
    let event = NewRideEvent {
        ride_id: ride.ride_id.clone(),
        pickup_x: ride.pickup.0,
        pickup_y: ride.pickup.1,
        end_x: ride.dropoff.0,
        end_y: ride.dropoff.1,
        price: ride.fare,
        exclude_driver_ids,
    };
    if let Err(e) = s.substrate.xadd(ORDER_EVENTS_STREAM, &event.to_fields()).await {
        tracing::warn!(ride_id = %ride.ride_id, error = %e, "failed to re-enqueue rejected ride");
    }
    (StatusCode::OK, Json(ride)).into_response()
}

/// `POST /passengers/{id}/rides/{ride_id}/cancel`
pub async fn cancel_ride(
    State(s): State<Arc<AppState>>,
    Path((_passenger_id, ride_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match s.rides.cancel(&ride_id).await {
        Ok(ride) => {
            if let Some(driver_id) = &ride.driver_id {
                let _ = s.lock.release_proposal_or_assignment(driver_id, &ride_id).await;
                let _ = s
                    .bus
                    .publish(driver_id, NotificationEnvelope::RideCancelled { ride_id: ride_id.clone() })
                    .await;
            }
            (StatusCode::OK, Json(ride)).into_response()
        }
        Err(e) => e.to_http_response("failed to cancel ride").into_response(),
    }
}
