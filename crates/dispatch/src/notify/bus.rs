// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Notification bus: publishes envelopes onto the substrate's pub/sub
//! channels (for external/other-instance observers) and, in the same
//! process, forwards them straight into the connection registry so a
//! websocket client attached to this instance sees them without a round
//! trip through the substrate.

use std::sync::Arc;

use crate::error::DispatchError;
use crate::events::{
    NotificationEnvelope, RecipientKind, DRIVER_NOTIFICATIONS_CHANNEL, PASSENGER_NOTIFICATIONS_CHANNEL,
};
use crate::notify::registry::ConnectionRegistry;
use crate::substrate::Substrate;

pub struct NotificationBus {
    substrate: Arc<dyn Substrate>,
    registry: Arc<ConnectionRegistry>,
}

impl NotificationBus {
    pub fn new(substrate: Arc<dyn Substrate>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { substrate, registry }
    }

    pub async fn publish(
        &self,
        recipient_id: &str,
        envelope: NotificationEnvelope,
    ) -> Result<(), DispatchError> {
        let channel = match envelope.recipient() {
            RecipientKind::Driver => DRIVER_NOTIFICATIONS_CHANNEL,
            RecipientKind::Passenger => PASSENGER_NOTIFICATIONS_CHANNEL,
        };
        let wire = envelope.to_wire(recipient_id);
        let payload = serde_json::to_string(&wire).map_err(|_| DispatchError::Internal)?;
        self.substrate.publish(channel, &payload).await?;
        self.registry.send(recipient_id, envelope).await;
        Ok(())
    }
}
