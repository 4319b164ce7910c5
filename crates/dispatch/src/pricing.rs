// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Manhattan-distance fare and ETA estimation, grounded on the original
//! `calculate_price_and_eta` behavior: a flat base fare plus a per-cell rate,
//! floored at a minimum fare.

use crate::config::DispatchConfig;

pub fn manhattan_distance(from: (i64, i64), to: (i64, i64)) -> i64 {
    (from.0 - to.0).abs() + (from.1 - to.1).abs()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceEstimate {
    pub fare: f64,
    pub eta_secs: u32,
}

pub fn calculate_price_and_eta(
    config: &DispatchConfig,
    pickup: (i64, i64),
    dropoff: (i64, i64),
) -> PriceEstimate {
    let distance = manhattan_distance(pickup, dropoff);
    let raw_fare = config.base_fare + config.price_per_cell * distance as f64;
    let fare = raw_fare.max(config.min_fare);
    let eta_secs = distance as u32 * config.time_per_cell;
    PriceEstimate { fare, eta_secs }
}
