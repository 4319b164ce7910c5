// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Configuration for the dispatch engine, mirroring spec.md §6.

/// Configuration for the taxi dispatch engine.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "taxi-dispatchd", about = "Grid-world taxi matching and dispatch engine")]
pub struct DispatchConfig {
    /// Host to bind the HTTP/WS surface on.
    #[arg(long, default_value = "127.0.0.1", env = "DISPATCH_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "DISPATCH_PORT")]
    pub port: u16,

    /// Bearer token for API auth. If unset, auth is disabled.
    #[arg(long, env = "DISPATCH_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Redis connection string backing the KV substrate.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "DISPATCH_REDIS_URL")]
    pub redis_url: String,

    /// Grid width (number of distinct X coordinates).
    #[arg(long, default_value_t = 100, env = "DISPATCH_GRID_N")]
    pub grid_n: u32,

    /// Grid height (number of distinct Y coordinates).
    #[arg(long, default_value_t = 100, env = "DISPATCH_GRID_M")]
    pub grid_m: u32,

    /// Maximum Chebyshev ring radius the spiral search will expand to.
    #[arg(long, default_value_t = 20, env = "DISPATCH_MAX_SEARCH_RADIUS")]
    pub max_search_radius: u32,

    /// Seconds a driver has to respond to a proposal before it times out.
    #[arg(long, default_value_t = 25, env = "DISPATCH_PROPOSAL_TIMEOUT_SECS")]
    pub proposal_timeout_secs: u64,

    /// Seconds a driver lock survives before expiry (must exceed the proposal timeout).
    #[arg(long, default_value_t = 30, env = "DISPATCH_DRIVER_LOCK_TTL_SECS")]
    pub driver_lock_ttl_secs: u64,

    /// Reaper tick interval in milliseconds.
    #[arg(long, default_value_t = 1000, env = "DISPATCH_REAPER_TICK_MS")]
    pub reaper_tick_ms: u64,

    /// Number of heartbeat intervals before a lapsed presence entry is swept.
    #[arg(long, default_value_t = 3, env = "DISPATCH_HEARTBEAT_TTL_MULTIPLE")]
    pub heartbeat_ttl_multiple: u32,

    /// Expected heartbeat interval in milliseconds, used to size the presence TTL.
    #[arg(long, default_value_t = 5000, env = "DISPATCH_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: u64,

    /// Base fare charged on every ride.
    #[arg(long, default_value_t = 2.5, env = "DISPATCH_BASE_FARE")]
    pub base_fare: f64,

    /// Fare charged per grid cell of Manhattan distance.
    #[arg(long, default_value_t = 0.75, env = "DISPATCH_PRICE_PER_CELL")]
    pub price_per_cell: f64,

    /// Minimum fare for any ride, regardless of distance.
    #[arg(long, default_value_t = 3.0, env = "DISPATCH_MIN_FARE")]
    pub min_fare: f64,

    /// Estimated seconds of travel time per grid cell.
    #[arg(long, default_value_t = 45, env = "DISPATCH_TIME_PER_CELL")]
    pub time_per_cell: u32,
}

impl DispatchConfig {
    pub fn proposal_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.proposal_timeout_secs)
    }

    pub fn driver_lock_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.driver_lock_ttl_secs)
    }

    pub fn reaper_tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reaper_tick_ms)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// TTL applied to `driver_last_seen:{id}`, swept by the presence reconciler.
    pub fn presence_ttl(&self) -> std::time::Duration {
        self.heartbeat_interval() * self.heartbeat_ttl_multiple
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as u64) < self.grid_n as u64 && (y as u64) < self.grid_m as u64
    }
}
