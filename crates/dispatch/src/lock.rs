// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Driver lock manager: `driver_lock:{id}` holds the ride id a driver is
//! currently committed to. All mutations are single round-trip scripted ops
//! on the substrate so concurrent matching workers can race safely.

use std::sync::Arc;
use std::time::Duration;

use crate::error::DispatchError;
use crate::substrate::Substrate;

fn lock_key(driver_id: &str) -> String {
    format!("driver_lock:{driver_id}")
}

pub struct LockManager {
    substrate: Arc<dyn Substrate>,
}

impl LockManager {
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self { substrate }
    }

    /// Attempts to claim `driver_id` for `ride_id`. Only one caller across
    /// the whole substrate can win this for a given driver at a time.
    pub async fn try_lock(
        &self,
        driver_id: &str,
        ride_id: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError> {
        self.substrate.set_nx_ex(&lock_key(driver_id), ride_id, ttl).await
    }

    pub async fn get_lock(&self, driver_id: &str) -> Result<Option<String>, DispatchError> {
        self.substrate.get(&lock_key(driver_id)).await
    }

    /// Releases the lock only if it still points at `ride_id` — a reaper and
    /// a passenger cancellation racing each other cannot both "win".
    pub async fn release_if(&self, driver_id: &str, ride_id: &str) -> Result<bool, DispatchError> {
        self.substrate.del_if_eq(&lock_key(driver_id), ride_id).await
    }

    /// Releases `driver_id`'s lock for `ride_id`, whether it is still the
    /// time-bounded proposal value or has already been promoted by
    /// [`Self::reassign`] to the permanent `"assigned:{ride_id}"` marker.
    /// Used on cancellation, which can land before or after driver accept.
    pub async fn release_proposal_or_assignment(
        &self,
        driver_id: &str,
        ride_id: &str,
    ) -> Result<bool, DispatchError> {
        if self.release_if(driver_id, ride_id).await? {
            return Ok(true);
        }
        let assigned = format!("assigned:{ride_id}");
        self.substrate.del_if_eq(&lock_key(driver_id), &assigned).await
    }

    /// Promotes a time-bounded proposal lock (`ride_id`) into a permanent
    /// assignment marker, without a TTL, once the driver accepts.
    pub async fn reassign(&self, driver_id: &str, from_ride_id: &str) -> Result<bool, DispatchError> {
        let assigned = format!("assigned:{from_ride_id}");
        self.substrate.cas(&lock_key(driver_id), from_ride_id, &assigned).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::FakeSubstrate;

    #[tokio::test]
    async fn only_one_caller_wins_try_lock() {
        let substrate = Arc::new(FakeSubstrate::new());
        let mgr = LockManager::new(substrate);

        assert!(mgr.try_lock("d1", "r1", Duration::from_secs(30)).await.unwrap());
        assert!(!mgr.try_lock("d1", "r2", Duration::from_secs(30)).await.unwrap());
        assert_eq!(mgr.get_lock("d1").await.unwrap(), Some("r1".to_owned()));
    }

    #[tokio::test]
    async fn release_if_requires_matching_ride() {
        let substrate = Arc::new(FakeSubstrate::new());
        let mgr = LockManager::new(substrate);

        mgr.try_lock("d1", "r1", Duration::from_secs(30)).await.unwrap();
        assert!(!mgr.release_if("d1", "r2").await.unwrap());
        assert!(mgr.release_if("d1", "r1").await.unwrap());
        assert_eq!(mgr.get_lock("d1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reassign_promotes_to_permanent_marker() {
        let substrate = Arc::new(FakeSubstrate::new());
        let mgr = LockManager::new(substrate);

        mgr.try_lock("d1", "r1", Duration::from_secs(30)).await.unwrap();
        assert!(mgr.reassign("d1", "r1").await.unwrap());
        assert_eq!(mgr.get_lock("d1").await.unwrap(), Some("assigned:r1".to_owned()));
        // Once assigned, a reaper trying to release against the stale proposal id fails.
        assert!(!mgr.release_if("d1", "r1").await.unwrap());
    }

    #[tokio::test]
    async fn release_proposal_or_assignment_handles_both_shapes() {
        let substrate = Arc::new(FakeSubstrate::new());
        let mgr = LockManager::new(substrate);

        // Still a bare proposal lock (driver never accepted).
        mgr.try_lock("d1", "r1", Duration::from_secs(30)).await.unwrap();
        assert!(mgr.release_proposal_or_assignment("d1", "r1").await.unwrap());
        assert_eq!(mgr.get_lock("d1").await.unwrap(), None);

        // Already promoted to a permanent assignment marker by `reassign`.
        mgr.try_lock("d2", "r2", Duration::from_secs(30)).await.unwrap();
        mgr.reassign("d2", "r2").await.unwrap();
        assert!(mgr.release_proposal_or_assignment("d2", "r2").await.unwrap());
        assert_eq!(mgr.get_lock("d2").await.unwrap(), None);
    }

    /// Invariant 1: at any instant, at most one ride_id holds a given
    /// driver's lock. N workers race `try_lock` for the same driver
    /// concurrently; exactly one may win.
    #[tokio::test]
    async fn at_most_one_caller_wins_under_concurrency() {
        let substrate = Arc::new(FakeSubstrate::new());
        let mgr = Arc::new(LockManager::new(substrate));

        let mut handles = Vec::new();
        for i in 0..16 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.try_lock("contended-driver", &format!("ride-{i}"), Duration::from_secs(30)).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1, "exactly one of the 16 concurrent try_lock callers should win");
    }
}
