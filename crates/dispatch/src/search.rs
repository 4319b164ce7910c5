// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Spiral search: expanding Chebyshev rings around a pickup cell, pipelined
//! per-ring occupant fetches, first successful lock wins.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::DispatchError;
use crate::lock::LockManager;
use crate::presence::PresenceIndex;

/// Cells forming the Chebyshev ring at the given radius around `(cx, cy)`.
/// Radius 0 is just the center cell itself.
fn ring_cells(cx: i64, cy: i64, radius: i64) -> Vec<(i64, i64)> {
    if radius == 0 {
        return vec![(cx, cy)];
    }
    let mut cells = Vec::new();
    for dx in -radius..=radius {
        for dy in -radius..=radius {
            if dx.abs() == radius || dy.abs() == radius {
                cells.push((cx + dx, cy + dy));
            }
        }
    }
    cells
}

/// Sort key for the ascending driver-id tie-break within a ring: numeric
/// comparison for the decimal ids spec.md §3 defines, falling back to the
/// raw string for any id that doesn't parse (so arbitrary test fixtures
/// still sort deterministically).
fn driver_sort_key(id: &str) -> (u64, &str) {
    (id.parse().unwrap_or(u64::MAX), id)
}

pub struct SpiralSearch {
    presence: Arc<PresenceIndex>,
    lock: Arc<LockManager>,
    max_radius: u32,
}

impl SpiralSearch {
    pub fn new(presence: Arc<PresenceIndex>, lock: Arc<LockManager>, max_radius: u32) -> Self {
        Self { presence, lock, max_radius }
    }

    /// Searches outward from `(cx, cy)`, trying to lock the first driver
    /// (ascending id order within a ring) that is not in `exclude` and whose
    /// lock is still free. Returns the locked driver id, or `NoDriverFound`
    /// once `max_radius` is exhausted.
    pub async fn find_and_lock(
        &self,
        cx: i64,
        cy: i64,
        ride_id: &str,
        lock_ttl: Duration,
        exclude: &BTreeSet<String>,
    ) -> Result<String, DispatchError> {
        for radius in 0..=self.max_radius as i64 {
            let cells = ring_cells(cx, cy, radius);
            let occupant_lists = self.presence.cell_occupants_batch(&cells).await?;

            let mut seen: HashSet<String> = HashSet::new();
            let mut candidates: Vec<String> = Vec::new();
            for occupants in occupant_lists {
                for driver_id in occupants {
                    if !exclude.contains(&driver_id) && seen.insert(driver_id.clone()) {
                        candidates.push(driver_id);
                    }
                }
            }
            candidates.sort_by(|a, b| driver_sort_key(a).cmp(&driver_sort_key(b)));

            for driver_id in candidates {
                if self.lock.try_lock(&driver_id, ride_id, lock_ttl).await? {
                    return Ok(driver_id);
                }
            }
        }
        Err(DispatchError::NoDriverFound)
    }
}
