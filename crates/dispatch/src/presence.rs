// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Presence index: which drivers currently occupy which grid cell, keyed by
//! `cell:{x}:{y}` hash buckets (field = driver id, value = presence status)
//! plus a per-driver `driver_location:{id}` entry recording the cell a
//! driver is currently filed under (so a later heartbeat can evict the old
//! bucket membership).

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::substrate::Substrate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    Busy,
    Offline,
}

impl DriverStatus {
    /// The value stored in a `cell:{x}:{y}` hash bucket for this status.
    fn as_str(self) -> &'static str {
        match self {
            DriverStatus::Available => "online",
            DriverStatus::Busy => "busy",
            DriverStatus::Offline => "offline",
        }
    }
}

fn cell_key(x: i64, y: i64) -> String {
    format!("cell:{x}:{y}")
}

fn location_key(driver_id: &str) -> String {
    format!("driver_location:{driver_id}")
}

fn last_seen_key(driver_id: &str) -> String {
    format!("driver_last_seen:{driver_id}")
}

pub struct PresenceIndex {
    substrate: Arc<dyn Substrate>,
    presence_ttl: Duration,
    /// Every driver id a heartbeat has ever named, for the reconciliation
    /// sweep to check — the substrate itself exposes no "list all drivers"
    /// primitive, so this process tracks it locally.
    known_drivers: StdMutex<HashSet<String>>,
}

impl PresenceIndex {
    pub fn new(substrate: Arc<dyn Substrate>, presence_ttl: Duration) -> Self {
        Self { substrate, presence_ttl, known_drivers: StdMutex::new(HashSet::new()) }
    }

    /// Driver ids this index has ever seen a heartbeat for. Feeds
    /// [`Self::reconcile_lapsed`]'s `known_drivers` argument.
    pub fn known_driver_ids(&self) -> Vec<String> {
        self.known_drivers.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }

    /// Upserts a driver's cell membership, evicting the prior bucket if the
    /// driver moved. `offline` removes all presence for the driver. Repeated
    /// identical heartbeats are idempotent.
    pub async fn heartbeat(
        &self,
        driver_id: &str,
        x: i64,
        y: i64,
        status: DriverStatus,
        in_bounds: impl Fn(i64, i64) -> bool,
    ) -> Result<(), DispatchError> {
        if !in_bounds(x, y) {
            return Err(DispatchError::InvalidCoordinate);
        }

        self.known_drivers.lock().unwrap_or_else(|p| p.into_inner()).insert(driver_id.to_owned());

        let loc_key = location_key(driver_id);
        let previous = self.substrate.get(&loc_key).await?;

        if status == DriverStatus::Offline {
            if let Some(prev) = previous {
                if let Some((px, py)) = parse_cell(&prev) {
                    self.substrate.hdel(&cell_key(px, py), driver_id).await?;
                }
            }
            self.substrate.del(&loc_key).await?;
            self.substrate.del(&last_seen_key(driver_id)).await?;
            return Ok(());
        }

        let new_cell = format!("{x}:{y}");
        if let Some(prev) = &previous {
            if prev != &new_cell {
                if let Some((px, py)) = parse_cell(prev) {
                    self.substrate.hdel(&cell_key(px, py), driver_id).await?;
                }
            }
        }

        self.substrate.hset(&cell_key(x, y), driver_id, status.as_str()).await?;
        self.substrate.set(&loc_key, &new_cell, None).await?;
        self.substrate
            .set(&last_seen_key(driver_id), "1", Some(self.presence_ttl))
            .await?;
        Ok(())
    }

    pub async fn cell_occupants(&self, x: i64, y: i64) -> Result<Vec<String>, DispatchError> {
        self.substrate.hkeys(&cell_key(x, y)).await
    }

    pub async fn cell_occupants_batch(
        &self,
        cells: &[(i64, i64)],
    ) -> Result<Vec<Vec<String>>, DispatchError> {
        let keys: Vec<String> = cells.iter().map(|(x, y)| cell_key(*x, *y)).collect();
        self.substrate.hkeys_batch(&keys).await
    }

    /// Sweeps presence for drivers whose `driver_last_seen:{id}` lapsed.
    /// `known_drivers` is the full set of driver ids the caller still cares
    /// about; each is checked and reconciled if its last-seen key expired.
    pub async fn reconcile_lapsed(&self, known_drivers: &[String]) -> Result<u64, DispatchError> {
        let mut swept = 0u64;
        for driver_id in known_drivers {
            if self.substrate.get(&last_seen_key(driver_id)).await?.is_some() {
                continue;
            }
            let loc_key = location_key(driver_id);
            if let Some(prev) = self.substrate.get(&loc_key).await? {
                if let Some((px, py)) = parse_cell(&prev) {
                    self.substrate.hdel(&cell_key(px, py), driver_id).await?;
                }
                self.substrate.del(&loc_key).await?;
                swept += 1;
            }
        }
        Ok(swept)
    }
}

fn parse_cell(s: &str) -> Option<(i64, i64)> {
    let (x, y) = s.split_once(':')?;
    Some((x.parse().ok()?, y.parse().ok()?))
}
