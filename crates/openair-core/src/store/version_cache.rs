// ── Protocol generation cache ──

use dashmap::DashMap;
use tracing::debug;

use openair_api::{EndpointIdentity, Generation};

/// Which client generation last succeeded for an endpoint.
///
/// Shared by every orchestrator in a process so a device is only ever
/// probed once. Lives for the process lifetime; nothing is persisted.
#[derive(Debug, Default)]
pub struct VersionCache {
    entries: DashMap<EndpointIdentity, Generation>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, endpoint: &EndpointIdentity) -> Option<Generation> {
        self.entries.get(endpoint).map(|r| *r.value())
    }

    pub fn remember(&self, endpoint: EndpointIdentity, generation: Generation) {
        if self.entries.insert(endpoint.clone(), generation) != Some(generation) {
            debug!(%endpoint, %generation, "cached protocol generation");
        }
    }

    /// Forget one endpoint. The next connect probes again.
    pub fn forget(&self, endpoint: &EndpointIdentity) -> Option<Generation> {
        self.entries.remove(endpoint).map(|(_, g)| g)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
