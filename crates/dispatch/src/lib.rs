// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Real-time grid-world taxi matching and dispatch engine.

pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod notify;
pub mod presence;
pub mod pricing;
pub mod ride;
pub mod search;
pub mod state;
pub mod substrate;
pub mod transport;
pub mod worker;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::events::{MATCHING_GROUP, ORDER_EVENTS_STREAM, RETRY_SEARCH_EVENTS_STREAM};
use crate::ride::InMemoryRideStore;
use crate::state::AppState;
use crate::substrate::RedisSubstrate;
use crate::transport::build_router;
use crate::worker::{MatchingWorker, TimeoutReaper};

/// Run the dispatch engine until shutdown.
pub async fn run(config: DispatchConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let substrate = Arc::new(RedisSubstrate::connect(&config.redis_url).await?);
    let rides = Arc::new(InMemoryRideStore::new());
    let state = Arc::new(AppState::new(config.clone(), substrate.clone(), rides.clone(), shutdown.clone()));

    spawn_matching_workers(&state, shutdown.clone());
    spawn_reaper(&state, shutdown.clone());
    spawn_presence_reconciler(&state, shutdown.clone());

    tracing::info!("taxi-dispatchd listening on {addr}");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

fn spawn_matching_workers(state: &Arc<AppState>, shutdown: CancellationToken) {
    for stream in [ORDER_EVENTS_STREAM, RETRY_SEARCH_EVENTS_STREAM] {
        let worker = Arc::new(MatchingWorker::new(
            state.substrate.clone(),
            state.search.clone(),
            state.lock.clone(),
            state.bus.clone(),
            state.rides.clone(),
            state.config.proposal_timeout_secs,
            state.config.driver_lock_ttl(),
        ));
        let consumer = format!("{stream}-{}", Uuid::new_v4());
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(stream, &consumer, shutdown).await });
    }
    tracing::debug!(group = MATCHING_GROUP, "matching workers spawned");
}

fn spawn_reaper(state: &Arc<AppState>, shutdown: CancellationToken) {
    let reaper = Arc::new(TimeoutReaper::new(
        state.substrate.clone(),
        state.lock.clone(),
        state.rides.clone(),
        state.config.reaper_tick_interval(),
    ));
    tokio::spawn(async move { reaper.run(shutdown).await });
}

/// Periodically sweeps presence for drivers whose `driver_last_seen:{id}`
/// lapsed (spec.md §9's "heartbeat -> presence reconciliation"). Ticks on
/// the heartbeat interval, same as a lapsed driver is expected to miss.
fn spawn_presence_reconciler(state: &Arc<AppState>, shutdown: CancellationToken) {
    let presence = state.presence.clone();
    let tick_interval = state.config.heartbeat_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("presence reconciler shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let known = presence.known_driver_ids();
                    match presence.reconcile_lapsed(&known).await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(swept = n, "reconciled lapsed driver presence"),
                        Err(e) => tracing::warn!(error = %e, "presence reconciliation sweep failed"),
                    }
                }
            }
        }
    });
}
