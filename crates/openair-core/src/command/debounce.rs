// ── Debounced writes ──
//
// Keyed by write target. Each new value aborts the pending task for its key
// outright and schedules a fresh one, so only the latest value in a burst
// is ever sent.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Pending {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type PendingMap<K> = Arc<Mutex<HashMap<K, Pending>>>;

fn lock<K>(map: &PendingMap<K>) -> MutexGuard<'_, HashMap<K, Pending>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Debouncer<K> {
    window: Duration,
    pending: PendingMap<K>,
    next_id: AtomicU64,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run `action` once `window` passes without another call for `key`.
    pub fn schedule<F, Fut>(&self, key: K, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let window = self.window;
        let pending = Arc::clone(&self.pending);
        let task_cancel = cancel.clone();
        let task_key = key.clone();

        // Held across the spawn so the task cannot look itself up before
        // it has been inserted.
        let mut map = lock(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = task_cancel.cancelled() => return,
                () = tokio::time::sleep(window) => {}
            }
            {
                let mut map = lock(&pending);
                if map.get(&task_key).is_none_or(|p| p.id != id) {
                    return;
                }
                map.remove(&task_key);
            }
            action().await;
        });
        if let Some(previous) = map.insert(key, Pending { id, cancel, handle }) {
            previous.cancel.cancel();
            previous.handle.abort();
        }
    }

    /// Drop the pending write for `key`. Returns `true` if one existed.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = lock(&self.pending).remove(key);
        removed.is_some_and(|p| {
            p.cancel.cancel();
            p.handle.abort();
            true
        })
    }

    pub fn cancel_all(&self) {
        let drained: Vec<Pending> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        for p in drained {
            p.cancel.cancel();
            p.handle.abort();
        }
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for p in map.values() {
            p.cancel.cancel();
            p.handle.abort();
        }
    }
}
