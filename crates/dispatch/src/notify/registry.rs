// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Connection registry: one broadcast channel per connected recipient
//! (driver or passenger), so a websocket handler can subscribe to exactly
//! the notifications addressed to its user.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::events::NotificationEnvelope;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<String, broadcast::Sender<NotificationEnvelope>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a recipient, creating its channel on first connect.
    pub async fn subscribe(self: &Arc<Self>, recipient_id: &str) -> broadcast::Receiver<NotificationEnvelope> {
        let mut channels = self.channels.write().await;
        channels
            .entry(recipient_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Delivers an envelope to a recipient. A no-op (not an error) if nobody
    /// is currently connected for that recipient — notification delivery is
    /// best-effort, not exactly-once.
    pub async fn send(&self, recipient_id: &str, envelope: NotificationEnvelope) {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(recipient_id) {
            let _ = sender.send(envelope);
        }
    }
}
