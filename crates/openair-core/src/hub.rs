// ── Hub ──
//
// Process-wide owner of the version cache and the client factory. Hosts
// one orchestrator per device id.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use openair_api::ClientFactory;

use crate::config::SessionConfig;
use crate::controller::{Orchestrator, ProbeReport};
use crate::error::CoreError;
use crate::store::VersionCache;

pub struct Hub {
    factory: Arc<dyn ClientFactory>,
    versions: Arc<VersionCache>,
    devices: DashMap<String, Orchestrator>,
}

impl Hub {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_versions(factory, Arc::new(VersionCache::new()))
    }

    pub fn with_versions(factory: Arc<dyn ClientFactory>, versions: Arc<VersionCache>) -> Self {
        Self {
            factory,
            versions,
            devices: DashMap::new(),
        }
    }

    pub fn versions(&self) -> &Arc<VersionCache> {
        &self.versions
    }

    /// Create the orchestrator for `device_id`, destroying any previous
    /// one. Does not connect.
    pub async fn attach(&self, device_id: impl Into<String>, config: SessionConfig) -> Orchestrator {
        let device_id = device_id.into();
        let orchestrator = Orchestrator::new(
            config,
            Arc::clone(&self.factory),
            Arc::clone(&self.versions),
        );
        let previous = self.devices.insert(device_id.clone(), orchestrator.clone());
        if let Some(previous) = previous {
            previous.destroy().await;
        }
        info!(device_id, "device attached");
        orchestrator
    }

    pub fn get(&self, device_id: &str) -> Option<Orchestrator> {
        self.devices.get(device_id).map(|r| r.value().clone())
    }

    /// Destroy and forget the orchestrator for `device_id`.
    pub async fn detach(&self, device_id: &str) -> bool {
        let Some((_, orchestrator)) = self.devices.remove(device_id) else {
            return false;
        };
        orchestrator.destroy().await;
        info!(device_id, "device detached");
        true
    }

    /// Destroy every orchestrator.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.devices.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            self.detach(&id).await;
        }
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Probe a device without keeping a session.
    pub async fn test_connection(&self, config: SessionConfig) -> Result<ProbeReport, CoreError> {
        Orchestrator::test_connection(
            config,
            Arc::clone(&self.factory),
            Arc::clone(&self.versions),
        )
        .await
    }
}
