// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Matching worker: consumes ride events (new rides and retries) off a
//! consumer-group stream, runs the spiral search, and on success proposes
//! the winning driver; on failure it schedules a retry instead of giving up.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::events::{
    NewRideEvent, NotificationEnvelope, MATCHING_GROUP, PROPOSAL_TIMEOUTS_KEY, RETRY_SEARCH_EVENTS_STREAM,
};
use crate::lock::LockManager;
use crate::notify::NotificationBus;
use crate::ride::RideStore;
use crate::search::SpiralSearch;
use crate::substrate::Substrate;

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

pub struct MatchingWorker {
    substrate: Arc<dyn Substrate>,
    search: Arc<SpiralSearch>,
    lock: Arc<LockManager>,
    bus: Arc<NotificationBus>,
    rides: Arc<dyn RideStore>,
    proposal_timeout_secs: f64,
    lock_ttl: std::time::Duration,
}

impl MatchingWorker {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        search: Arc<SpiralSearch>,
        lock: Arc<LockManager>,
        bus: Arc<NotificationBus>,
        rides: Arc<dyn RideStore>,
        proposal_timeout_secs: u64,
        lock_ttl: std::time::Duration,
    ) -> Self {
        Self {
            substrate,
            search,
            lock,
            bus,
            rides,
            proposal_timeout_secs: proposal_timeout_secs as f64,
            lock_ttl,
        }
    }

    /// Runs the block-read -> search -> propose/retry loop against `stream`
    /// until `shutdown` fires. Safe to run several instances over the same
    /// stream concurrently; the consumer group hands each entry to exactly
    /// one of them.
    pub async fn run(&self, stream: &str, consumer: &str, shutdown: CancellationToken) {
        if let Err(e) = self.substrate.ensure_consumer_group(stream, MATCHING_GROUP).await {
            tracing::error!(stream, error = %e, "failed to ensure consumer group, worker exiting");
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(stream, "matching worker shutting down");
                    return;
                }
                result = self.substrate.xreadgroup_block(stream, MATCHING_GROUP, consumer) => {
                    match result {
                        Ok(msg) => {
                            let id = msg.id.clone();
                            if let Err(e) = self.handle_one(&msg).await {
                                tracing::warn!(stream, entry_id = %id, error = %e, "dropping poison message");
                            }
                            if let Err(e) = self.substrate.xack(stream, MATCHING_GROUP, &id).await {
                                tracing::warn!(stream, entry_id = %id, error = %e, "xack failed");
                            }
                        }
                        Err(e) => {
                            tracing::error!(stream, error = %e, "stream read failed, worker exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_one(&self, msg: &crate::substrate::StreamMessage) -> Result<(), DispatchError> {
        let event = NewRideEvent::from_message(msg)?;
        let exclude: BTreeSet<String> = event.exclude_driver_ids.iter().cloned().collect();

        match self
            .search
            .find_and_lock(event.pickup_x, event.pickup_y, &event.ride_id, self.lock_ttl, &exclude)
            .await
        {
            Ok(driver_id) => {
                let deadline = now_secs() + self.proposal_timeout_secs;
                self.substrate
                    .zadd(PROPOSAL_TIMEOUTS_KEY, &format!("{}:{}", event.ride_id, driver_id), deadline)
                    .await?;
                self.bus
                    .publish(
                        &driver_id,
                        NotificationEnvelope::NewOrderProposal {
                            ride_id: event.ride_id.clone(),
                            driver_id,
                            pickup_x: event.pickup_x,
                            pickup_y: event.pickup_y,
                            end_x: event.end_x,
                            end_y: event.end_y,
                            price: event.price,
                        },
                    )
                    .await?;
                Ok(())
            }
            Err(DispatchError::NoDriverFound) => {
                // Notifications are addressed to the passenger's own user
                // id, not the ride id; fall back to the ride id only if the
                // ride record itself cannot be found (e.g. a poison event).
                let recipient = match self.rides.get(&event.ride_id).await {
                    Ok(ride) => ride.passenger_id,
                    Err(_) => event.ride_id.clone(),
                };
                self.bus
                    .publish(
                        &recipient,
                        NotificationEnvelope::NoDriversAvailable { ride_id: event.ride_id.clone() },
                    )
                    .await?;
                self.substrate
                    .xadd(RETRY_SEARCH_EVENTS_STREAM, &event.to_fields())
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
