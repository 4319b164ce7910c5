// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::lock::LockManager;
use crate::notify::{ConnectionRegistry, NotificationBus};
use crate::presence::PresenceIndex;
use crate::ride::RideStore;
use crate::search::SpiralSearch;
use crate::substrate::Substrate;

/// Shared application state, reachable from every HTTP/WS handler and
/// background worker.
pub struct AppState {
    pub config: DispatchConfig,
    pub substrate: Arc<dyn Substrate>,
    pub presence: Arc<PresenceIndex>,
    pub lock: Arc<LockManager>,
    pub search: Arc<SpiralSearch>,
    pub rides: Arc<dyn RideStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub bus: Arc<NotificationBus>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: DispatchConfig,
        substrate: Arc<dyn Substrate>,
        rides: Arc<dyn RideStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let presence = Arc::new(PresenceIndex::new(substrate.clone(), config.presence_ttl()));
        let lock = Arc::new(LockManager::new(substrate.clone()));
        let search = Arc::new(SpiralSearch::new(presence.clone(), lock.clone(), config.max_search_radius));
        let registry = Arc::new(ConnectionRegistry::new());
        let bus = Arc::new(NotificationBus::new(substrate.clone(), registry.clone()));

        Self { config, substrate, presence, lock, search, rides, registry, bus, shutdown }
    }
}
