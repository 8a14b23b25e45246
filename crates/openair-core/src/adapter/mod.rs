// ── Protocol adapters ──
//
// One sum type over the two client generations. Each variant owns its
// client and a fresh registry, normalizes advertisements and state pushes
// into the domain model, and emits them in arrival order on an unbounded
// `mpsc` channel consumed by the orchestrator.

mod legacy;
mod modern;

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use openair_api::{ClientFactory, DeviceEndpoint, DeviceInfo, Error, Generation};

use crate::command::{Command, CommandTarget, FanUpdate};
use crate::error::CoreError;
use crate::model::{EntityInfo, EntityKey, EntityKind, StateEvent, StateFields};
use crate::store::EntityRegistry;

pub use legacy::LegacyAdapter;
pub use modern::ModernAdapter;

// ── Events ───────────────────────────────────────────────────────────

/// What an adapter reports to its owner.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    EntityDiscovered(Arc<EntityInfo>),
    StateChanged(StateEvent),
    /// The transport went away without being asked to.
    Disconnected { reason: Option<String> },
}

#[derive(Debug, Clone, Copy)]
pub struct AdapterOptions {
    pub connect_timeout: Duration,
    pub settle_delay: Duration,
}

/// Result of a successful adapter connect.
#[derive(Debug, Clone)]
pub struct Connected {
    pub info: DeviceInfo,
    pub entities: Arc<Vec<Arc<EntityInfo>>>,
}

// ── ProtocolAdapter ──────────────────────────────────────────────────

/// Either client generation behind one capability set.
pub enum ProtocolAdapter {
    Modern(ModernAdapter),
    Legacy(LegacyAdapter),
}

impl ProtocolAdapter {
    /// Construct the adapter for `generation`. Fails with
    /// [`Error::Unavailable`] when the factory cannot provide the client and
    /// with [`Error::UnsupportedCredential`] when the endpoint's credential
    /// does not fit the generation.
    pub fn build(
        generation: Generation,
        factory: &dyn ClientFactory,
        endpoint: &DeviceEndpoint,
        options: AdapterOptions,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<Self, Error> {
        let core = AdapterCore::new(generation, options, events);
        match generation {
            Generation::Modern => ModernAdapter::build(factory, endpoint, core).map(Self::Modern),
            Generation::Legacy => LegacyAdapter::build(factory, endpoint, core).map(Self::Legacy),
        }
    }

    pub fn generation(&self) -> Generation {
        self.core().generation
    }

    pub fn registry(&self) -> Arc<EntityRegistry> {
        Arc::clone(&self.core().sink.registry)
    }

    /// Open the transport and, with `wait_for_entities`, collect the
    /// initial advertisement burst before returning.
    pub async fn connect(&self, wait_for_entities: bool) -> Result<Connected, Error> {
        let info = match self {
            Self::Modern(a) => a.connect(wait_for_entities).await?,
            Self::Legacy(a) => a.connect(wait_for_entities).await?,
        };
        Ok(Connected {
            info,
            entities: self.core().sink.registry.all(),
        })
    }

    /// Best-effort teardown. Stops event delivery first, so an intentional
    /// disconnect never surfaces as [`AdapterEvent::Disconnected`].
    pub async fn disconnect(&self) {
        self.core().stop_pump();
        let result = match self {
            Self::Modern(a) => a.client().disconnect().await,
            Self::Legacy(a) => a.client().disconnect().await,
        };
        if let Err(e) = result {
            warn!(generation = %self.generation(), error = %e, "disconnect failed");
        }
    }

    pub async fn send_fan_command(&self, key: EntityKey, update: FanUpdate) -> Result<(), CoreError> {
        let wire_key = self.core().wire_key(key)?;
        let speed = update
            .speed
            .map(i32::try_from)
            .transpose()
            .map_err(|_| CoreError::InvalidCommand {
                message: format!("fan speed out of range for entity {key}"),
            })?;
        match self {
            Self::Modern(a) => a.fan(wire_key, update.on, speed).await,
            Self::Legacy(a) => a.fan(wire_key, update.on, speed).await,
        }
    }

    pub async fn send_switch_command(&self, key: EntityKey, on: bool) -> Result<(), CoreError> {
        let wire_key = self.core().wire_key(key)?;
        match self {
            Self::Modern(a) => a.switch(wire_key, on).await,
            Self::Legacy(a) => a.switch(wire_key, on).await,
        }
    }

    pub async fn set_valve_position(&self, key: EntityKey, position: f32) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&position) {
            return Err(CoreError::InvalidCommand {
                message: format!("valve position {position} outside 0.0..=1.0"),
            });
        }
        let wire_key = self.core().wire_key(key)?;
        match self {
            Self::Modern(a) => a.valve(wire_key, Some(position), false).await,
            Self::Legacy(a) => a.valve(wire_key, Some(position), false).await,
        }
    }

    pub async fn stop_valve(&self, key: EntityKey) -> Result<(), CoreError> {
        let wire_key = self.core().wire_key(key)?;
        match self {
            Self::Modern(a) => a.valve(wire_key, None, true).await,
            Self::Legacy(a) => a.valve(wire_key, None, true).await,
        }
    }

    pub async fn press_button(&self, key: EntityKey) -> Result<(), CoreError> {
        let wire_key = self.core().wire_key(key)?;
        match self {
            Self::Modern(a) => a.button(wire_key).await,
            Self::Legacy(a) => a.button(wire_key).await,
        }
    }

    fn core(&self) -> &AdapterCore {
        match self {
            Self::Modern(a) => &a.core,
            Self::Legacy(a) => &a.core,
        }
    }
}

#[async_trait]
impl CommandTarget for ProtocolAdapter {
    async fn execute(&self, command: Command) -> Result<(), CoreError> {
        match command {
            Command::SetFan { key, update } => self.send_fan_command(key, update).await,
            Command::SetSwitch { key, on } => self.send_switch_command(key, on).await,
            Command::SetValvePosition { key, position } => {
                self.set_valve_position(key, position).await
            }
            Command::StopValve { key } => self.stop_valve(key).await,
            Command::PressButton { key } => self.press_button(key).await,
        }
    }
}

// ── Shared session machinery ─────────────────────────────────────────

/// A raw client message reduced to what the domain cares about.
pub(crate) enum Normalized {
    Entity(EntityInfo),
    State { key: EntityKey, fields: StateFields },
    Closed { reason: Option<String> },
}

/// Implemented by each generation's raw message type.
pub(crate) trait WireMessage: Send + 'static {
    fn normalize(self, generation: Generation) -> Normalized;
}

enum Flow {
    Continue,
    Closed(Option<String>),
}

#[derive(Clone)]
struct EventSink {
    registry: Arc<EntityRegistry>,
    events: mpsc::UnboundedSender<AdapterEvent>,
}

impl EventSink {
    /// Apply one message to the registry and forward the resulting event.
    /// Closure is reported to the caller, never forwarded here.
    fn apply(&self, message: Normalized) -> Flow {
        match message {
            Normalized::Entity(info) => {
                let info = Arc::new(info);
                if !self.registry.upsert(Arc::clone(&info)) {
                    debug!(key = %info.key, "entity re-advertised");
                }
                let _ = self.events.send(AdapterEvent::EntityDiscovered(info));
            }
            Normalized::State { key, fields } => match self.registry.get(key) {
                Some(entity) => {
                    let _ = self
                        .events
                        .send(AdapterEvent::StateChanged(StateEvent::new(entity, fields)));
                }
                None => debug!(%key, "state for unknown entity dropped"),
            },
            Normalized::Closed { reason } => return Flow::Closed(reason),
        }
        Flow::Continue
    }
}

/// State every adapter variant carries.
pub(crate) struct AdapterCore {
    generation: Generation,
    options: AdapterOptions,
    sink: EventSink,
    pump: Mutex<Option<CancellationToken>>,
}

impl AdapterCore {
    fn new(
        generation: Generation,
        options: AdapterOptions,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Self {
        Self {
            generation,
            options,
            sink: EventSink {
                registry: Arc::new(EntityRegistry::new()),
                events,
            },
            pump: Mutex::new(None),
        }
    }

    /// Run `handshake` under the connect deadline, optionally settle the
    /// advertisement burst, then hand the stream to a background pump.
    async fn establish<M, F>(&self, handshake: F, wait_for_entities: bool) -> Result<DeviceInfo, Error>
    where
        M: WireMessage,
        F: Future<Output = Result<(DeviceInfo, mpsc::Receiver<M>), Error>> + Send,
    {
        let timeout = self.options.connect_timeout;
        let attempt = async {
            let (info, mut messages) = handshake.await?;
            if wait_for_entities {
                self.settle(&mut messages).await?;
            }
            Ok::<_, Error>((info, messages))
        };
        let (info, messages) = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| Error::Timeout { after: timeout })??;

        debug!(
            generation = %self.generation,
            entities = self.sink.registry.len(),
            "adapter connected"
        );
        let cancel = CancellationToken::new();
        tokio::spawn(pump(
            messages,
            self.sink.clone(),
            self.generation,
            cancel.clone(),
        ));
        let previous = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cancel);
        if let Some(previous) = previous {
            previous.cancel();
        }
        Ok(info)
    }

    /// Consume messages until `settle_delay` has passed since the first
    /// advertisement, or since the handshake if nothing is advertised.
    async fn settle<M: WireMessage>(&self, messages: &mut mpsc::Receiver<M>) -> Result<(), Error> {
        let settle = self.options.settle_delay;
        let mut deadline = Instant::now() + settle;
        let mut seen_first = false;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return Ok(()),
                message = messages.recv() => {
                    let Some(message) = message else {
                        return Err(Error::Closed { reason: None });
                    };
                    let normalized = message.normalize(self.generation);
                    let is_advert = matches!(normalized, Normalized::Entity(_));
                    if let Flow::Closed(reason) = self.sink.apply(normalized) {
                        return Err(Error::Closed { reason });
                    }
                    if is_advert && !seen_first {
                        seen_first = true;
                        deadline = Instant::now() + settle;
                    }
                }
            }
        }
    }

    fn stop_pump(&self) {
        if let Some(cancel) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
        }
    }

    /// Wire key for a domain key, if this session's firmware advertised it.
    fn wire_key(&self, key: EntityKey) -> Result<u32, CoreError> {
        self.sink
            .registry
            .get(key)
            .and_then(|e| e.handle)
            .filter(|h| h.generation == self.generation)
            .map(|h| h.wire_key)
            .ok_or(CoreError::EntityMapping { key })
    }
}

impl Drop for AdapterCore {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

async fn pump<M: WireMessage>(
    mut messages: mpsc::Receiver<M>,
    sink: EventSink,
    generation: Generation,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            message = messages.recv() => match message {
                None => break None,
                Some(m) => {
                    if let Flow::Closed(reason) = sink.apply(m.normalize(generation)) {
                        break reason;
                    }
                }
            },
        }
    };
    debug!(%generation, ?reason, "transport closed");
    let _ = sink.events.send(AdapterEvent::Disconnected { reason });
}

/// Canonical kind from a generation-specific type tag.
pub(crate) fn kind_from_tag(tag: &str) -> EntityKind {
    match tag.to_ascii_lowercase().replace('_', "").as_str() {
        "fan" => EntityKind::Fan,
        "sensor" => EntityKind::Sensor,
        "binarysensor" => EntityKind::BinarySensor,
        "switch" => EntityKind::Switch,
        "valve" => EntityKind::Valve,
        "button" => EntityKind::Button,
        _ => EntityKind::Other,
    }
}
