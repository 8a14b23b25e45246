// ── Per-session entity registry ──
//
// Lock-free storage keyed by the session-local entity key, with a
// snapshot rebuilt on every mutation and pushed through a `watch` channel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::model::{EntityInfo, EntityKey, EntityKind};

/// The set of entities one session discovered.
///
/// Owned by exactly one adapter. A new session always gets a new registry,
/// so keys from an earlier session can never resolve against it.
pub struct EntityRegistry {
    session_id: Uuid,
    by_key: DashMap<EntityKey, Arc<EntityInfo>>,
    /// Key-ordered snapshot, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<EntityInfo>>>>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("session_id", &self.session_id)
            .field("len", &self.by_key.len())
            .finish()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            session_id: Uuid::new_v4(),
            by_key: DashMap::new(),
            snapshot,
        }
    }

    /// Identifies the session this registry belongs to.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    pub fn upsert(&self, entity: Arc<EntityInfo>) -> bool {
        let is_new = self.by_key.insert(entity.key, entity).is_none();
        self.rebuild_snapshot();
        is_new
    }

    pub fn get(&self, key: EntityKey) -> Option<Arc<EntityInfo>> {
        self.by_key.get(&key).map(|r| Arc::clone(r.value()))
    }

    /// All entities, ordered by key. Cheap `Arc` clone.
    pub fn all(&self) -> Arc<Vec<Arc<EntityInfo>>> {
        self.snapshot.borrow().clone()
    }

    pub fn by_kind(&self, kind: EntityKind) -> Vec<Arc<EntityInfo>> {
        self.all()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// First entity (in key order) whose name contains `fragment`,
    /// ignoring case.
    pub fn find_by_name(&self, fragment: &str) -> Option<Arc<EntityInfo>> {
        let needle = fragment.to_lowercase();
        self.all()
            .iter()
            .find(|e| e.name.to_lowercase().contains(&needle))
            .cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<EntityInfo>>>> {
        self.snapshot.subscribe()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<EntityInfo>> =
            self.by_key.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by_key(|e| e.key);
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
