// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! The ride state machine contract. A real deployment backs `RideStore` with
//! a SQL-backed implementation (out of scope here); this crate ships an
//! in-memory reference implementation so matching/dispatch logic is fully
//! testable on its own.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    DriverAssigned,
    DriverArrived,
    PassengerOnboard,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// True if `next` is a legal transition from `self`, per the state
    /// machine: pending -> driver_assigned -> driver_arrived ->
    /// {passenger_onboard -> in_progress -> completed} | cancelled.
    /// Cancellation is allowed from any non-terminal state.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        use RideStatus::*;
        if next == Cancelled {
            return !matches!(self, Completed | Cancelled);
        }
        matches!(
            (self, next),
            (Pending, DriverAssigned)
                | (DriverAssigned, DriverArrived)
                | (DriverArrived, PassengerOnboard)
                | (PassengerOnboard, InProgress)
                | (InProgress, Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub ride_id: String,
    pub passenger_id: String,
    pub driver_id: Option<String>,
    pub pickup: (i64, i64),
    pub dropoff: (i64, i64),
    pub status: RideStatus,
    pub fare: f64,
    pub eta_secs: u32,
}

/// Mirrors the original `crud.accept_ride` / `crud.reject_ride` /
/// `crud.cancel_ride` call shape: each mutation returns the updated ride or
/// a `StateConflict`, so HTTP handlers map failures straight to 4xx.
#[async_trait]
pub trait RideStore: Send + Sync {
    async fn create(
        &self,
        passenger_id: &str,
        pickup: (i64, i64),
        dropoff: (i64, i64),
        fare: f64,
        eta_secs: u32,
    ) -> Result<Ride, DispatchError>;

    async fn get(&self, ride_id: &str) -> Result<Ride, DispatchError>;

    async fn assign(&self, ride_id: &str, driver_id: &str) -> Result<Ride, DispatchError>;

    async fn reject(&self, ride_id: &str) -> Result<Ride, DispatchError>;

    async fn arrive(&self, ride_id: &str) -> Result<Ride, DispatchError>;

    async fn board(&self, ride_id: &str) -> Result<Ride, DispatchError>;

    async fn start(&self, ride_id: &str) -> Result<Ride, DispatchError>;

    async fn complete(&self, ride_id: &str) -> Result<Ride, DispatchError>;

    async fn cancel(&self, ride_id: &str) -> Result<Ride, DispatchError>;
}

#[derive(Default)]
pub struct InMemoryRideStore {
    rides: Mutex<HashMap<String, Ride>>,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        &self,
        ride_id: &str,
        next: RideStatus,
        driver_id: Option<&str>,
    ) -> Result<Ride, DispatchError> {
        let mut rides = self.rides.lock().unwrap_or_else(|p| p.into_inner());
        let ride = rides.get_mut(ride_id).ok_or(DispatchError::NotFound)?;
        if !ride.status.can_transition_to(next) {
            return Err(DispatchError::StateConflict);
        }
        ride.status = next;
        if let Some(d) = driver_id {
            ride.driver_id = Some(d.to_owned());
        }
        Ok(ride.clone())
    }
}

#[async_trait]
impl RideStore for InMemoryRideStore {
    async fn create(
        &self,
        passenger_id: &str,
        pickup: (i64, i64),
        dropoff: (i64, i64),
        fare: f64,
        eta_secs: u32,
    ) -> Result<Ride, DispatchError> {
        let ride = Ride {
            ride_id: Uuid::new_v4().to_string(),
            passenger_id: passenger_id.to_owned(),
            driver_id: None,
            pickup,
            dropoff,
            status: RideStatus::Pending,
            fare,
            eta_secs,
        };
        self.rides
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(ride.ride_id.clone(), ride.clone());
        Ok(ride)
    }

    async fn get(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        self.rides
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(ride_id)
            .cloned()
            .ok_or(DispatchError::NotFound)
    }

    async fn assign(&self, ride_id: &str, driver_id: &str) -> Result<Ride, DispatchError> {
        self.transition(ride_id, RideStatus::DriverAssigned, Some(driver_id))
    }

    async fn reject(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        // A driver rejection returns the ride to pending so it can re-enter
        // the matching stream; it is not itself a state-machine edge above.
        let mut rides = self.rides.lock().unwrap_or_else(|p| p.into_inner());
        let ride = rides.get_mut(ride_id).ok_or(DispatchError::NotFound)?;
        if ride.status != RideStatus::DriverAssigned {
            return Err(DispatchError::StateConflict);
        }
        ride.status = RideStatus::Pending;
        ride.driver_id = None;
        Ok(ride.clone())
    }

    async fn arrive(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        self.transition(ride_id, RideStatus::DriverArrived, None)
    }

    async fn board(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        self.transition(ride_id, RideStatus::PassengerOnboard, None)
    }

    async fn start(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        self.transition(ride_id, RideStatus::InProgress, None)
    }

    async fn complete(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        self.transition(ride_id, RideStatus::Completed, None)
    }

    async fn cancel(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        self.transition(ride_id, RideStatus::Cancelled, None)
    }
}
