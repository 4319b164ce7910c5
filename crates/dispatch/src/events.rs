// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Wire schemas for the two ride-event streams (`order_events`,
//! `retry_search_events`) and for notification envelopes pushed to
//! passengers/drivers over the notification bus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::substrate::StreamMessage;

pub const ORDER_EVENTS_STREAM: &str = "order_events";
pub const RETRY_SEARCH_EVENTS_STREAM: &str = "retry_search_events";
pub const MATCHING_GROUP: &str = "matching_group";

pub const DRIVER_NOTIFICATIONS_CHANNEL: &str = "driver_notifications";
pub const PASSENGER_NOTIFICATIONS_CHANNEL: &str = "passenger_notifications";

/// `proposal_timeouts` sorted-set key: scored by deadline, member
/// `"{ride_id}:{driver_id}"`. Shared between the matching worker (which adds
/// the entry), the reaper (which sweeps it), and the accept/reject HTTP
/// handlers (which clear it early once the proposal is resolved).
pub const PROPOSAL_TIMEOUTS_KEY: &str = "proposal_timeouts";

/// A new ride needing a driver, or a ride being retried after a failed
/// search. `exclude_driver_ids` is empty for a fresh `new_ride` and carries
/// the driver(s) to skip on a `retry_ride` (the source only ever carries
/// one; this widens the field to a set per SPEC_FULL.md §4.3/§9).
/// `end_x`/`end_y`/`price` carry the ride's dropoff and fare so the
/// eventual `NEW_ORDER_PROPOSAL` can include them without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRideEvent {
    pub ride_id: String,
    pub pickup_x: i64,
    pub pickup_y: i64,
    pub end_x: i64,
    pub end_y: i64,
    pub price: f64,
    #[serde(default)]
    pub exclude_driver_ids: Vec<String>,
}

impl NewRideEvent {
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("ride_id", self.ride_id.clone()),
            ("pickup_x", self.pickup_x.to_string()),
            ("pickup_y", self.pickup_y.to_string()),
            ("end_x", self.end_x.to_string()),
            ("end_y", self.end_y.to_string()),
            ("price", self.price.to_string()),
        ];
        if !self.exclude_driver_ids.is_empty() {
            fields.push(("exclude_driver_ids", self.exclude_driver_ids.join(",")));
        }
        fields
    }

    pub fn from_message(msg: &StreamMessage) -> Result<Self, DispatchError> {
        Self::from_fields(&msg.fields)
    }

    fn from_fields(fields: &HashMap<String, String>) -> Result<Self, DispatchError> {
        let ride_id = fields.get("ride_id").ok_or(DispatchError::BadRequest)?.clone();
        let pickup_x = fields
            .get("pickup_x")
            .and_then(|v| v.parse().ok())
            .ok_or(DispatchError::BadRequest)?;
        let pickup_y = fields
            .get("pickup_y")
            .and_then(|v| v.parse().ok())
            .ok_or(DispatchError::BadRequest)?;
        let end_x = fields.get("end_x").and_then(|v| v.parse().ok()).ok_or(DispatchError::BadRequest)?;
        let end_y = fields.get("end_y").and_then(|v| v.parse().ok()).ok_or(DispatchError::BadRequest)?;
        let price = fields.get("price").and_then(|v| v.parse().ok()).ok_or(DispatchError::BadRequest)?;
        let exclude_driver_ids = fields
            .get("exclude_driver_ids")
            .map(|v| v.split(',').filter(|s| !s.is_empty()).map(str::to_owned).collect())
            .unwrap_or_default();
        Ok(Self { ride_id, pickup_x, pickup_y, end_x, end_y, price, exclude_driver_ids })
    }
}

/// Envelope pushed to a connected passenger or driver over the notification
/// bus. Used as the native in-process broadcast type (registered per
/// recipient in `ConnectionRegistry`); at the substrate pub/sub boundary and
/// the outbound websocket frame it is flattened into [`WireEnvelope`], the
/// bit-exact `{type, recipient_user_id, data}` shape from SPEC_FULL.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEnvelope {
    NewOrderProposal {
        ride_id: String,
        driver_id: String,
        pickup_x: i64,
        pickup_y: i64,
        end_x: i64,
        end_y: i64,
        price: f64,
    },
    NoDriversAvailable { ride_id: String },
    ProposalAccepted { ride_id: String, driver_id: String },
    RideCancelled { ride_id: String },
}

impl NotificationEnvelope {
    /// The recipient this envelope targets: the passenger for order-facing
    /// events, the candidate driver for proposals.
    pub fn recipient(&self) -> RecipientKind {
        match self {
            Self::NewOrderProposal { .. } => RecipientKind::Driver,
            Self::NoDriversAvailable { .. } | Self::ProposalAccepted { .. } | Self::RideCancelled { .. } => {
                RecipientKind::Passenger
            }
        }
    }

    /// The `type` discriminator as it appears on the wire, matching the
    /// literal names from SPEC_FULL.md §3 (`NEW_ORDER_PROPOSAL`,
    /// `RIDE_ACCEPTED`, ...).
    fn wire_type(&self) -> &'static str {
        match self {
            Self::NewOrderProposal { .. } => "NEW_ORDER_PROPOSAL",
            Self::NoDriversAvailable { .. } => "NO_DRIVERS_AVAILABLE",
            Self::ProposalAccepted { .. } => "RIDE_ACCEPTED",
            Self::RideCancelled { .. } => "RIDE_CANCELLED",
        }
    }

    /// Flattens this envelope into the wire-exact shape addressed to
    /// `recipient_user_id`, for the substrate pub/sub channel and the
    /// outbound websocket frame.
    pub fn to_wire(&self, recipient_user_id: &str) -> WireEnvelope {
        let data = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        WireEnvelope {
            recipient_user_id: recipient_user_id.to_owned(),
            r#type: self.wire_type().to_owned(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    Driver,
    Passenger,
}

/// The bit-exact notification envelope from SPEC_FULL.md §6:
/// `{"type": "...", "recipient_user_id": <id>, "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub recipient_user_id: String,
    pub r#type: String,
    pub data: serde_json::Value,
}
