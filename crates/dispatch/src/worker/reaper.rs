// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Timeout reaper: periodically sweeps `proposal_timeouts` for proposals a
//! driver never answered, releases the lock if it still belongs to that
//! proposal, and re-enters the ride into the retry path. Idempotent across
//! multiple reaper instances racing the same tick.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::events::{NewRideEvent, PROPOSAL_TIMEOUTS_KEY, RETRY_SEARCH_EVENTS_STREAM};
use crate::lock::LockManager;
use crate::ride::RideStore;
use crate::substrate::Substrate;

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

pub struct TimeoutReaper {
    substrate: Arc<dyn Substrate>,
    lock: Arc<LockManager>,
    rides: Arc<dyn RideStore>,
    tick_interval: std::time::Duration,
}

impl TimeoutReaper {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        lock: Arc<LockManager>,
        rides: Arc<dyn RideStore>,
        tick_interval: std::time::Duration,
    ) -> Self {
        Self { substrate, lock, rides, tick_interval }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("timeout reaper shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(error = %e, "reaper sweep failed, will retry next tick");
                    }
                }
            }
        }
    }

    async fn sweep(&self) -> Result<(), crate::error::DispatchError> {
        let expired = self.substrate.zrangebyscore_le(PROPOSAL_TIMEOUTS_KEY, now_secs()).await?;
        if expired.is_empty() {
            return Ok(());
        }

        self.substrate.zrem(PROPOSAL_TIMEOUTS_KEY, &expired).await?;

        for member in expired {
            let Some((ride_id, driver_id)) = member.split_once(':') else {
                tracing::warn!(member = %member, "malformed proposal_timeouts member, skipping");
                continue;
            };

            // Another reaper, or the driver's own late accept/reject, may
            // have already resolved this lock; if so the ride itself has
            // already moved on and must not be re-queued a second time.
            if !self.lock.release_if(driver_id, ride_id).await? {
                continue;
            }

            match self.rides.get(ride_id).await {
                Ok(ride) => {
                    let event = NewRideEvent {
                        ride_id: ride_id.to_owned(),
                        pickup_x: ride.pickup.0,
                        pickup_y: ride.pickup.1,
                        end_x: ride.dropoff.0,
                        end_y: ride.dropoff.1,
                        price: ride.fare,
                        exclude_driver_ids: vec![driver_id.to_owned()],
                    };
                    self.substrate.xadd(RETRY_SEARCH_EVENTS_STREAM, &event.to_fields()).await?;
                }
                Err(_) => {
                    tracing::warn!(ride_id, "reaped proposal for unknown ride, dropping");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride::InMemoryRideStore;
    use crate::substrate::FakeSubstrate;

    #[tokio::test]
    async fn sweeps_expired_proposal_and_releases_lock() {
        let substrate = Arc::new(FakeSubstrate::new());
        let lock = Arc::new(LockManager::new(substrate.clone()));
        let rides: Arc<dyn RideStore> = Arc::new(InMemoryRideStore::new());

        let ride = rides.create("p1", (2, 3), (5, 5), 10.0, 300).await.unwrap();
        lock.try_lock("d1", &ride.ride_id, std::time::Duration::from_secs(30)).await.unwrap();
        substrate
            .zadd(PROPOSAL_TIMEOUTS_KEY, &format!("{}:d1", ride.ride_id), now_secs() - 1.0)
            .await
            .unwrap();

        let reaper = TimeoutReaper::new(substrate.clone(), lock.clone(), rides, std::time::Duration::from_secs(1));
        reaper.sweep().await.unwrap();

        assert_eq!(lock.get_lock("d1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn already_resolved_lock_is_not_retried() {
        let substrate = Arc::new(FakeSubstrate::new());
        let lock = Arc::new(LockManager::new(substrate.clone()));
        let rides: Arc<dyn RideStore> = Arc::new(InMemoryRideStore::new());

        let ride = rides.create("p1", (0, 0), (1, 1), 5.0, 60).await.unwrap();
        // The driver accepted before the reaper got to this stale timeout
        // entry: the lock has already been promoted off the proposal value
        // `release_if` checks against.
        lock.try_lock("d1", &ride.ride_id, std::time::Duration::from_secs(30)).await.unwrap();
        lock.reassign("d1", &ride.ride_id).await.unwrap();
        substrate
            .zadd(PROPOSAL_TIMEOUTS_KEY, &format!("{}:d1", ride.ride_id), now_secs() - 1.0)
            .await
            .unwrap();

        let reaper = TimeoutReaper::new(substrate.clone(), lock, rides, std::time::Duration::from_secs(1));
        reaper.sweep().await.unwrap();

        let retried = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            substrate.xreadgroup_block(RETRY_SEARCH_EVENTS_STREAM, crate::events::MATCHING_GROUP, "test"),
        )
        .await;
        assert!(retried.is_err(), "an already-accepted ride must not be spuriously re-enqueued");
    }

    #[tokio::test]
    async fn sweep_with_nothing_expired_is_noop() {
        let substrate = Arc::new(FakeSubstrate::new());
        let lock = Arc::new(LockManager::new(substrate.clone()));
        let rides: Arc<dyn RideStore> = Arc::new(InMemoryRideStore::new());
        let reaper = TimeoutReaper::new(substrate, lock, rides, std::time::Duration::from_secs(1));
        reaper.sweep().await.unwrap();
    }

    #[tokio::test]
    async fn double_sweep_is_idempotent() {
        let substrate = Arc::new(FakeSubstrate::new());
        let lock = Arc::new(LockManager::new(substrate.clone()));
        let rides: Arc<dyn RideStore> = Arc::new(InMemoryRideStore::new());
        let ride = rides.create("p1", (0, 0), (1, 1), 5.0, 60).await.unwrap();
        lock.try_lock("d1", &ride.ride_id, std::time::Duration::from_secs(30)).await.unwrap();
        substrate
            .zadd(PROPOSAL_TIMEOUTS_KEY, &format!("{}:d1", ride.ride_id), now_secs() - 1.0)
            .await
            .unwrap();

        let reaper = TimeoutReaper::new(substrate, lock, rides, std::time::Duration::from_secs(1));
        reaper.sweep().await.unwrap();
        // Second sweep finds nothing left to reap; must not error or double-release.
        reaper.sweep().await.unwrap();
    }
}
