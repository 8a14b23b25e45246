// ── Reconnection controller ──
//
// Owns the single backoff timer for a session. Drop notifications arrive
// from the event forwarder; the timer calls back into the orchestrator
// through `ReconnectTarget`. At most one timer exists at any time, and a
// drop reported while an attempt is in flight is folded into that attempt.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first attempt. Default: 5s.
    #[serde(with = "crate::config::duration_ms")]
    pub initial_delay: Duration,

    /// Upper bound on any single delay. Default: 60s.
    #[serde(with = "crate::config::duration_ms")]
    pub max_delay: Duration,

    /// Consecutive failures before giving up. Default: 10.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// `delay = min(initial * 2^attempt, max)`, `attempt` counted from 0.
pub fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    config
        .initial_delay
        .checked_mul(factor)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

// ── State ────────────────────────────────────────────────────────────

/// Observable reconnect state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Idle,
    /// Timer armed. `attempt` is 1-based.
    Scheduled { attempt: u32, delay: Duration },
    Reconnecting { attempt: u32 },
    /// Attempt budget exhausted. Only a caller-initiated connect leaves this.
    GaveUp,
}

/// What the controller drives.
#[async_trait]
pub trait ReconnectTarget: Send + Sync + 'static {
    /// Make one reconnection attempt.
    async fn reconnect(&self) -> Result<(), CoreError>;

    /// An attempt was scheduled.
    fn scheduled(&self, _attempt: u32, _delay: Duration) {}

    /// Stop the attempt in flight. `reconnect` must still return so the
    /// target can release what it opened; its result is discarded.
    fn abandon(&self) {}

    /// The attempt budget ran out. Called once per exhaustion.
    fn gave_up(&self, attempts: u32);
}

struct Task {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    target: Arc<dyn ReconnectTarget>,
}

struct Inner {
    /// Consecutive failed attempts since the last success or reset.
    failures: u32,
    task: Option<Task>,
    in_flight: bool,
    /// A drop was reported while the attempt was in flight.
    lost_in_flight: bool,
    gave_up: bool,
    next_id: u64,
}

// ── ReconnectController ──────────────────────────────────────────────

pub struct ReconnectController {
    config: ReconnectConfig,
    inner: Mutex<Inner>,
    state: watch::Sender<ReconnectState>,
}

impl ReconnectController {
    pub fn new(config: ReconnectConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ReconnectState::Idle);
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                failures: 0,
                task: None,
                in_flight: false,
                lost_in_flight: false,
                gave_up: false,
                next_id: 0,
            }),
            state,
        })
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn state(&self) -> watch::Receiver<ReconnectState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ReconnectState {
        *self.state.borrow()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The link dropped unexpectedly. Arms the timer unless one is already
    /// armed, an attempt is in flight, or the budget is exhausted.
    pub fn connection_lost(self: &Arc<Self>, target: Arc<dyn ReconnectTarget>) {
        let mut inner = self.lock();
        if inner.in_flight {
            // The attempt in flight decides what happens next.
            debug!("reconnect in flight, deferring drop");
            inner.lost_in_flight = true;
            return;
        }
        if inner.task.is_some() {
            debug!("reconnect already pending, ignoring drop");
            return;
        }
        if inner.gave_up {
            debug!("reconnect budget exhausted, ignoring drop");
            return;
        }
        let exhausted = self.schedule_locked(&mut inner, Arc::clone(&target));
        drop(inner);
        if let Some(attempts) = exhausted {
            target.gave_up(attempts);
        }
    }

    /// Caller-initiated teardown: stop any timer or attempt and go idle.
    /// Does not count as a failure.
    ///
    /// A sleeping timer is aborted. An attempt in flight is abandoned
    /// through the target instead, so it can close whatever it opened.
    pub fn cancel(&self) {
        let (task, in_flight) = {
            let mut inner = self.lock();
            inner.lost_in_flight = false;
            (inner.task.take(), std::mem::take(&mut inner.in_flight))
        };
        if let Some(task) = task {
            task.cancel.cancel();
            if in_flight {
                debug!("abandoning reconnect attempt in flight");
                task.target.abandon();
            } else {
                debug!("cancelling pending reconnect");
                task.handle.abort();
            }
        }
        self.state.send_replace(ReconnectState::Idle);
    }

    /// `cancel` plus a fresh attempt budget.
    pub fn reset(&self) {
        self.cancel();
        let mut inner = self.lock();
        inner.failures = 0;
        inner.gave_up = false;
    }

    /// Returns `Some(attempts)` if the budget ran out instead.
    fn schedule_locked(
        self: &Arc<Self>,
        inner: &mut Inner,
        target: Arc<dyn ReconnectTarget>,
    ) -> Option<u32> {
        if inner.failures >= self.config.max_attempts {
            error!(
                max_attempts = self.config.max_attempts,
                "reconnection limit reached, giving up"
            );
            inner.gave_up = true;
            self.state.send_replace(ReconnectState::GaveUp);
            return Some(inner.failures);
        }

        let delay = backoff_delay(inner.failures, &self.config);
        let attempt = inner.failures + 1;
        inner.next_id += 1;
        let id = inner.next_id;
        let cancel = CancellationToken::new();

        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );
        let handle = tokio::spawn(Arc::clone(self).run_attempt(
            id,
            attempt,
            delay,
            cancel.clone(),
            Arc::clone(&target),
        ));
        let task = Task {
            id,
            cancel,
            handle,
            target: Arc::clone(&target),
        };
        if let Some(stale) = inner.task.replace(task) {
            stale.cancel.cancel();
            stale.handle.abort();
        }
        self.state
            .send_replace(ReconnectState::Scheduled { attempt, delay });
        target.scheduled(attempt, delay);
        None
    }

    async fn run_attempt(
        self: Arc<Self>,
        id: u64,
        attempt: u32,
        delay: Duration,
        cancel: CancellationToken,
        target: Arc<dyn ReconnectTarget>,
    ) {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        {
            let mut inner = self.lock();
            if inner.task.as_ref().map(|t| t.id) != Some(id) {
                return;
            }
            inner.in_flight = true;
            inner.lost_in_flight = false;
        }
        self.state
            .send_replace(ReconnectState::Reconnecting { attempt });

        // Never dropped mid-flight: a cancelled attempt still tears down
        // its own transport before returning.
        let result = target.reconnect().await;

        let mut inner = self.lock();
        if cancel.is_cancelled() || inner.task.as_ref().map(|t| t.id) != Some(id) {
            return;
        }
        inner.in_flight = false;
        let lost = std::mem::take(&mut inner.lost_in_flight);
        // Release our own slot without aborting ourselves.
        inner.task = None;

        let reschedule = match result {
            Ok(()) => {
                info!(attempt, "reconnected");
                inner.failures = 0;
                self.state.send_replace(ReconnectState::Idle);
                // The new session already dropped again.
                lost
            }
            Err(CoreError::Destroyed) => {
                debug!(attempt, "reconnect target is gone, stopping");
                self.state.send_replace(ReconnectState::Idle);
                false
            }
            Err(e) => {
                warn!(error = %e, attempt, "reconnect attempt failed");
                inner.failures += 1;
                true
            }
        };
        if reschedule {
            let exhausted = self.schedule_locked(&mut inner, Arc::clone(&target));
            drop(inner);
            if let Some(attempts) = exhausted {
                target.gave_up(attempts);
            }
        }
    }
}

impl Drop for ReconnectController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = inner.task.take() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
