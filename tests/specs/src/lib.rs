// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Shared test harness for the dispatch engine's integration suite.
//!
//! Unlike a deployed instance, these tests never touch a real Redis: every
//! scenario drives the axum router in-process via `axum-test`, backed by
//! `FakeSubstrate` and the in-memory ride store, with the matching worker,
//! timeout reaper, and presence reconciler spawned as ordinary background
//! tasks against the same state.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use dispatch::config::DispatchConfig;
use dispatch::events::{MATCHING_GROUP, ORDER_EVENTS_STREAM, RETRY_SEARCH_EVENTS_STREAM};
use dispatch::ride::InMemoryRideStore;
use dispatch::state::AppState;
use dispatch::substrate::FakeSubstrate;
use dispatch::transport::build_router;
use dispatch::worker::{MatchingWorker, TimeoutReaper};

/// A running test instance: the `TestServer`, the shared `AppState` (for
/// reaching into presence/lock/substrate directly from a test), and the
/// `CancellationToken` that shuts the background workers down on drop.
pub struct TestHarness {
    pub server: TestServer,
    pub state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Build a harness with default config (100x100 grid, no auth, generous
/// search radius) and the matching worker + reaper running in the
/// background, exactly as `dispatch::run` wires them up.
pub async fn harness() -> TestHarness {
    harness_with_config(|_| {}).await
}

/// Same as [`harness`], but `configure` can override config fields (e.g.
/// `auth_token`, `proposal_timeout_secs`) before the router is built.
pub async fn harness_with_config(configure: impl FnOnce(&mut DispatchConfig)) -> TestHarness {
    let mut config = DispatchConfig::parse_from(["taxi-dispatchd"]);
    configure(&mut config);

    let shutdown = CancellationToken::new();
    let substrate = Arc::new(FakeSubstrate::new());
    let rides = Arc::new(InMemoryRideStore::new());
    let state = Arc::new(AppState::new(config, substrate, rides, shutdown.clone()));

    spawn_workers(&state, shutdown.clone());

    let router = build_router(state.clone());
    let server = TestServer::new(router).expect("failed to build test server");

    TestHarness { server, state, shutdown }
}

fn spawn_workers(state: &Arc<AppState>, shutdown: CancellationToken) {
    for (i, stream) in [ORDER_EVENTS_STREAM, RETRY_SEARCH_EVENTS_STREAM].into_iter().enumerate() {
        let worker = Arc::new(MatchingWorker::new(
            state.substrate.clone(),
            state.search.clone(),
            state.lock.clone(),
            state.bus.clone(),
            state.rides.clone(),
            state.config.proposal_timeout_secs,
            state.config.driver_lock_ttl(),
        ));
        let consumer = format!("test-consumer-{i}");
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(stream, &consumer, shutdown).await });
    }
    tracing::debug!(group = MATCHING_GROUP, "test matching workers spawned");

    let reaper = Arc::new(TimeoutReaper::new(
        state.substrate.clone(),
        state.lock.clone(),
        state.rides.clone(),
        state.config.reaper_tick_interval(),
    ));
    tokio::spawn(async move { reaper.run(shutdown.clone()).await });

    let presence = state.presence.clone();
    let tick_interval = state.config.heartbeat_interval();
    let presence_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = presence_shutdown.cancelled() => return,
                _ = interval.tick() => {
                    let known = presence.known_driver_ids();
                    let _ = presence.reconcile_lapsed(&known).await;
                }
            }
        }
    });
}

/// Poll an async `predicate` every `step` up to `timeout`, returning `true`
/// as soon as it succeeds. Used to wait for a background worker to catch up
/// with a request without a fixed, potentially-flaky sleep.
pub async fn wait_until<F, Fut>(timeout: Duration, step: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(step).await;
    }
}
