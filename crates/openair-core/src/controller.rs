// ── Connection orchestrator ──
//
// Owns one device session end to end: generation selection, adapter
// lifecycle, event fan-out, serialized writes, debouncing and automatic
// reconnection. Every lifecycle transition runs under one async mutex;
// an epoch counter lets late notifications from a torn-down session be
// recognized and dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use openair_api::{ClientFactory, DeviceInfo, EndpointIdentity, Error, Generation};

use crate::adapter::{AdapterEvent, AdapterOptions, Connected, ProtocolAdapter};
use crate::command::{Command, CommandSerializer, CommandTarget, Debouncer, FanUpdate};
use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::events::SessionEvent;
use crate::model::{EntityInfo, EntityKey, EntityKind};
use crate::reconnect::{ReconnectController, ReconnectState, ReconnectTarget};
use crate::store::{EntityRegistry, VersionCache};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnection gave up.
    Failed,
    Destroyed,
}

/// What a one-off probe found.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub generation: Generation,
    pub device: DeviceInfo,
    pub entities: Vec<Arc<EntityInfo>>,
}

/// Debounce slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WriteTarget {
    Fan(EntityKey),
    ValvePosition(EntityKey),
}

struct ActiveSession {
    generation: Generation,
    device: DeviceInfo,
    adapter: Arc<ProtocolAdapter>,
    commands: CommandSerializer,
    /// Stops the event forwarder and the command processor.
    cancel: CancellationToken,
}

// ── Orchestrator ─────────────────────────────────────────────────────

/// The main entry point for one device.
///
/// Cheaply cloneable via `Arc<OrchestratorInner>`. Does not connect on
/// construction; call [`connect()`](Self::connect).
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: SessionConfig,
    factory: Arc<dyn ClientFactory>,
    versions: Arc<VersionCache>,
    connection_state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<SessionEvent>,
    session: ArcSwapOption<ActiveSession>,
    /// The live session's registry, or an empty one. Swapped, never mutated
    /// from here.
    registry: ArcSwap<EntityRegistry>,
    /// Serializes connect, teardown and drop handling.
    lifecycle: Mutex<()>,
    /// Token of the newest connection attempt.
    attempt_cancel: std::sync::Mutex<CancellationToken>,
    epoch: AtomicU64,
    reconnect: Arc<ReconnectController>,
    debouncer: Debouncer<WriteTarget>,
    destroyed: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn ClientFactory>,
        versions: Arc<VersionCache>,
    ) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let reconnect = ReconnectController::new(config.reconnect.clone());
        let debouncer = Debouncer::new(config.debounce_window);

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                factory,
                versions,
                connection_state,
                event_tx,
                session: ArcSwapOption::const_empty(),
                registry: ArcSwap::from_pointee(EntityRegistry::new()),
                lifecycle: Mutex::new(()),
                attempt_cancel: std::sync::Mutex::new(CancellationToken::new()),
                epoch: AtomicU64::new(0),
                reconnect,
                debouncer,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Connect, replacing any existing session.
    ///
    /// Tries the cached generation for this endpoint if there is one,
    /// otherwise every generation in priority order. Resets the
    /// reconnection budget and cancels any pending reconnect.
    pub async fn connect(&self) -> Result<(), CoreError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(CoreError::Destroyed);
        }
        self.inner.reconnect.reset();
        self.connect_session().await
    }

    /// Caller-initiated teardown. Cancels pending reconnects and any
    /// in-flight attempt; emits no `Disconnected` event.
    pub async fn disconnect(&self) {
        self.inner.reconnect.cancel();
        self.cancel_attempt();
        self.inner.debouncer.cancel_all();

        let _guard = self.inner.lifecycle.lock().await;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.reconnect.cancel();
        let had_session = self.teardown().await;
        if !self.inner.destroyed.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
        }
        if had_session {
            info!(endpoint = %self.identity(), "disconnected");
        }
    }

    /// Terminal teardown. Every later `connect` fails with `Destroyed`.
    pub async fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
        self.disconnect().await;
        self.inner.reconnect.reset();
        self.set_state(ConnectionState::Destroyed);
        debug!(endpoint = %self.identity(), "orchestrator destroyed");
    }

    /// One full connect and detect cycle against a throwaway orchestrator.
    /// Keeps no session; the generation found is still cached.
    pub async fn test_connection(
        config: SessionConfig,
        factory: Arc<dyn ClientFactory>,
        versions: Arc<VersionCache>,
    ) -> Result<ProbeReport, CoreError> {
        let mut cfg = config;
        cfg.reconnect.max_attempts = 0;

        let probe = Self::new(cfg, factory, versions);
        let result = match probe.connect().await {
            Ok(()) => probe
                .inner
                .session
                .load_full()
                .map(|s| ProbeReport {
                    generation: s.generation,
                    device: s.device.clone(),
                    entities: s.adapter.registry().all().to_vec(),
                })
                .ok_or(CoreError::NotConnected),
            Err(e) => Err(e),
        };
        probe.destroy().await;
        result
    }

    async fn connect_session(&self) -> Result<(), CoreError> {
        let attempt = CancellationToken::new();
        {
            let mut current = self
                .inner
                .attempt_cancel
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            current.cancel();
            *current = attempt.clone();
        }

        let _guard = tokio::select! {
            biased;
            () = attempt.cancelled() => return Err(CoreError::Superseded),
            guard = self.inner.lifecycle.lock() => guard,
        };
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(CoreError::Destroyed);
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.teardown().await;
        self.set_state(ConnectionState::Connecting);

        let endpoint = &self.inner.config.endpoint;
        let identity = endpoint.identity();
        let candidates = match self.inner.versions.get(&identity) {
            Some(generation) => {
                debug!(%identity, %generation, "using cached generation");
                vec![generation]
            }
            None => Generation::PRIORITY.to_vec(),
        };
        let options = AdapterOptions {
            connect_timeout: self.inner.config.connect_timeout,
            settle_delay: self.inner.config.settle_delay,
        };

        let mut last_error = None;
        for generation in candidates {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let adapter = match ProtocolAdapter::build(
                generation,
                self.inner.factory.as_ref(),
                endpoint,
                options,
                events_tx,
            ) {
                Ok(adapter) => Arc::new(adapter),
                Err(e) => {
                    debug!(%identity, %generation, error = %e, "adapter not usable");
                    last_error = Some(e);
                    continue;
                }
            };

            debug!(%identity, %generation, "trying generation");
            let outcome = tokio::select! {
                biased;
                () = attempt.cancelled() => None,
                r = adapter.connect(true) => Some(r),
            };
            match outcome {
                None => {
                    adapter.disconnect().await;
                    self.set_state(ConnectionState::Disconnected);
                    return Err(CoreError::Superseded);
                }
                Some(Ok(connected)) => {
                    self.install(epoch, generation, adapter, connected, events_rx, &identity);
                    return Ok(());
                }
                Some(Err(e)) => {
                    warn!(%identity, %generation, error = %e, "connect attempt failed");
                    adapter.disconnect().await;
                    last_error = Some(e);
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        let source = last_error.unwrap_or_else(|| Error::Handshake {
            message: "no protocol generation attempted".into(),
        });
        Err(CoreError::ConnectionFailed {
            endpoint: identity.to_string(),
            source,
        })
    }

    /// Adopt a connected adapter as the live session.
    fn install(
        &self,
        epoch: u64,
        generation: Generation,
        adapter: Arc<ProtocolAdapter>,
        connected: Connected,
        mut events_rx: mpsc::UnboundedReceiver<AdapterEvent>,
        identity: &EndpointIdentity,
    ) {
        let registry = adapter.registry();
        self.inner.registry.store(Arc::clone(&registry));
        self.inner.versions.remember(identity.clone(), generation);

        let cancel = CancellationToken::new();
        let target: Arc<dyn CommandTarget> = adapter.clone();
        let (commands, _processor) = CommandSerializer::spawn(target, cancel.clone());
        self.inner.session.store(Some(Arc::new(ActiveSession {
            generation,
            device: connected.info.clone(),
            adapter,
            commands,
            cancel: cancel.clone(),
        })));

        // The initial burst goes out ahead of `Connected`.
        let mut early_drop = None;
        while let Ok(event) = events_rx.try_recv() {
            if let AdapterEvent::Disconnected { reason } = event {
                early_drop = Some(reason);
                break;
            }
            self.publish(event);
        }

        self.set_state(ConnectionState::Connected);
        let _ = self.inner.event_tx.send(SessionEvent::Connected {
            generation,
            device: connected.info,
        });
        info!(
            %identity,
            %generation,
            entities = connected.entities.len(),
            "connected"
        );

        tokio::spawn(event_forwarder_task(
            Arc::downgrade(&self.inner),
            epoch,
            events_rx,
            cancel,
            early_drop,
        ));
    }

    /// Release the live session, if any. Returns whether there was one.
    async fn teardown(&self) -> bool {
        let session = self.inner.session.swap(None);
        self.inner
            .registry
            .store(Arc::new(EntityRegistry::new()));
        let Some(session) = session else {
            return false;
        };
        session.cancel.cancel();
        session.adapter.disconnect().await;
        true
    }

    async fn connection_dropped(&self, epoch: u64, reason: Option<String>) {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.epoch.load(Ordering::SeqCst) != epoch
            || self.inner.destroyed.load(Ordering::SeqCst)
        {
            debug!(epoch, "ignoring drop from a superseded session");
            return;
        }
        if !self.teardown().await {
            return;
        }

        warn!(endpoint = %self.identity(), ?reason, "connection lost");
        self.set_state(ConnectionState::Disconnected);
        let _ = self
            .inner
            .event_tx
            .send(SessionEvent::Disconnected { reason });
        let hook: Arc<dyn ReconnectTarget> = Arc::new(ReconnectHook(Arc::downgrade(&self.inner)));
        self.inner.reconnect.connection_lost(hook);
    }

    fn cancel_attempt(&self) {
        self.inner
            .attempt_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Turn a fan on or off and/or change its speed.
    pub async fn set_fan_state(&self, key: EntityKey, update: FanUpdate) -> Result<(), CoreError> {
        self.submit(Command::SetFan { key, update }).await
    }

    pub async fn set_switch_state(&self, key: EntityKey, on: bool) -> Result<(), CoreError> {
        self.submit(Command::SetSwitch { key, on }).await
    }

    /// Move a valve. `position` runs from 0.0 (closed) to 1.0 (open).
    pub async fn set_valve_position(&self, key: EntityKey, position: f32) -> Result<(), CoreError> {
        self.submit(Command::SetValvePosition { key, position }).await
    }

    pub async fn stop_valve(&self, key: EntityKey) -> Result<(), CoreError> {
        self.submit(Command::StopValve { key }).await
    }

    pub async fn press_button(&self, key: EntityKey) -> Result<(), CoreError> {
        self.submit(Command::PressButton { key }).await
    }

    /// Debounced [`set_fan_state`](Self::set_fan_state): within one window
    /// only the last update for `key` is sent. Failures surface as
    /// [`SessionEvent::Error`].
    pub fn set_fan_state_debounced(&self, key: EntityKey, update: FanUpdate) {
        let this = self.clone();
        self.inner
            .debouncer
            .schedule(WriteTarget::Fan(key), move || async move {
                if let Err(e) = this.set_fan_state(key, update).await {
                    this.report_error(&e);
                }
            });
    }

    /// Debounced [`set_valve_position`](Self::set_valve_position).
    pub fn set_valve_position_debounced(&self, key: EntityKey, position: f32) {
        let this = self.clone();
        self.inner
            .debouncer
            .schedule(WriteTarget::ValvePosition(key), move || async move {
                if let Err(e) = this.set_valve_position(key, position).await {
                    this.report_error(&e);
                }
            });
    }

    async fn submit(&self, command: Command) -> Result<(), CoreError> {
        let session = self
            .inner
            .session
            .load_full()
            .ok_or(CoreError::NotConnected)?;
        let key = command.key();
        let kind = command.target_kind();
        match session.adapter.registry().get(key) {
            Some(entity) if entity.kind == kind => {}
            _ => return Err(CoreError::EntityNotFound { key, kind }),
        }
        session.commands.submit(command).await
    }

    // ── State observation ────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn reconnect_state(&self) -> watch::Receiver<ReconnectState> {
        self.inner.reconnect.state()
    }

    /// Subscribe to the session event stream.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// [`events()`](Self::events) as a `Stream`. Events a lagging consumer
    /// missed are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.inner.event_tx.subscribe()).filter_map(Result::ok)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.load().is_some()
    }

    /// Generation of the live session.
    pub fn generation(&self) -> Option<Generation> {
        self.inner.session.load().as_ref().map(|s| s.generation)
    }

    /// Handshake metadata of the live session, for diagnostics.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.session.load().as_ref().map(|s| s.device.clone())
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    /// The live session's registry. Empty when disconnected.
    pub fn registry(&self) -> Arc<EntityRegistry> {
        self.inner.registry.load_full()
    }

    pub fn entities(&self) -> Arc<Vec<Arc<EntityInfo>>> {
        self.inner.registry.load().all()
    }

    pub fn entities_by_kind(&self, kind: EntityKind) -> Vec<Arc<EntityInfo>> {
        self.inner.registry.load().by_kind(kind)
    }

    /// First entity whose name contains `fragment`, ignoring case.
    pub fn find_entity(&self, fragment: &str) -> Option<Arc<EntityInfo>> {
        self.inner.registry.load().find_by_name(fragment)
    }

    pub fn entity(&self, key: EntityKey) -> Option<Arc<EntityInfo>> {
        self.inner.registry.load().get(key)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn identity(&self) -> EndpointIdentity {
        self.inner.config.endpoint.identity()
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_replace(state);
    }

    fn publish(&self, event: AdapterEvent) {
        let event = match event {
            AdapterEvent::EntityDiscovered(entity) => SessionEvent::EntityDiscovered(entity),
            AdapterEvent::StateChanged(state) => SessionEvent::StateChanged(state),
            AdapterEvent::Disconnected { .. } => return,
        };
        let _ = self.inner.event_tx.send(event);
    }

    fn report_error(&self, error: &CoreError) {
        warn!(endpoint = %self.identity(), error = %error, "debounced write failed");
        let _ = self.inner.event_tx.send(SessionEvent::Error {
            message: error.to_string(),
        });
    }
}

// ── Reconnect wiring ─────────────────────────────────────────────────

/// Lets the reconnection controller drive an orchestrator without keeping
/// it alive.
struct ReconnectHook(Weak<OrchestratorInner>);

impl ReconnectHook {
    fn orchestrator(&self) -> Option<Orchestrator> {
        self.0.upgrade().map(|inner| Orchestrator { inner })
    }
}

#[async_trait]
impl ReconnectTarget for ReconnectHook {
    /// `Destroyed` once the orchestrator is gone, which ends the retry loop.
    async fn reconnect(&self) -> Result<(), CoreError> {
        let orchestrator = self.orchestrator().ok_or(CoreError::Destroyed)?;
        orchestrator.connect_session().await
    }

    fn scheduled(&self, attempt: u32, _delay: Duration) {
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator.set_state(ConnectionState::Reconnecting { attempt });
        }
    }

    fn abandon(&self) {
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator.cancel_attempt();
        }
    }

    fn gave_up(&self, attempts: u32) {
        if let Some(orchestrator) = self.orchestrator() {
            error!(endpoint = %orchestrator.identity(), attempts, "giving up on reconnection");
            orchestrator.set_state(ConnectionState::Failed);
            let _ = orchestrator
                .inner
                .event_tx
                .send(SessionEvent::ReconnectFailed { attempts });
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Forward adapter events for one session until it ends or is cancelled.
async fn event_forwarder_task(
    inner: Weak<OrchestratorInner>,
    epoch: u64,
    mut rx: mpsc::UnboundedReceiver<AdapterEvent>,
    cancel: CancellationToken,
    early_drop: Option<Option<String>>,
) {
    let reason = match early_drop {
        Some(reason) => reason,
        None => loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                event = rx.recv() => match event {
                    None => break None,
                    Some(AdapterEvent::Disconnected { reason }) => break reason,
                    Some(event) => {
                        let Some(inner) = inner.upgrade() else { return };
                        Orchestrator { inner }.publish(event);
                    }
                },
            }
        },
    };
    let Some(inner) = inner.upgrade() else { return };
    Orchestrator { inner }.connection_dropped(epoch, reason).await;
}

// ── Tests ────────────────────────────────────────────────────────────
