//! Scripted in-memory firmware for tests.
//!
//! [`FakeFirmware`] implements [`ClientFactory`] and hands out Modern and
//! Legacy clients that share one simulated device. Tests script which
//! generations the device accepts, how long the handshake takes, which
//! commands fail, and push state or drop the link at will. Everything the
//! clients were asked to do is recorded for later assertions.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::endpoint::{DeviceEndpoint, DeviceInfo};
use crate::error::Error;
use crate::factory::ClientFactory;
use crate::generation::Generation;
use crate::legacy::{LegacyAuth, LegacyClient, LegacyEntity, LegacyEntityKind, LegacyMessage, LegacySession};
use crate::modern::{
    ModernClient, ModernCredential, ModernEntity, ModernFanCommand, ModernMessage, ModernSession,
    ModernValveCommand,
};

const MESSAGE_CAPACITY: usize = 256;

// ── Scripted entities ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeEntityKind {
    Fan,
    Sensor,
    BinarySensor,
    Switch,
    Valve,
    Button,
}

#[derive(Debug, Clone)]
pub struct FakeEntity {
    pub key: u32,
    pub name: String,
    pub kind: FakeEntityKind,
}

impl FakeEntity {
    pub fn new(key: u32, name: impl Into<String>, kind: FakeEntityKind) -> Self {
        Self {
            key,
            name: name.into(),
            kind,
        }
    }

    fn object_id(&self) -> String {
        self.name
            .to_ascii_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// A command as it reached the simulated device.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Fan {
        generation: Generation,
        key: u32,
        on: Option<bool>,
        speed_level: Option<i32>,
    },
    Switch {
        generation: Generation,
        key: u32,
        on: bool,
    },
    Valve {
        generation: Generation,
        key: u32,
        position: Option<f32>,
        stop: bool,
    },
    Button {
        generation: Generation,
        key: u32,
    },
}

// ── Shared device state ─────────────────────────────────────────────

enum LiveLink {
    Modern(mpsc::Sender<ModernMessage>),
    Legacy(mpsc::Sender<LegacyMessage>),
}

struct FakeState {
    info: DeviceInfo,
    entities: Vec<FakeEntity>,
    accepts_modern: bool,
    accepts_legacy: bool,
    modern_available: bool,
    legacy_available: bool,
    reject_auth: bool,
    handshake_delay: Duration,
    advert_gap: Duration,
    command_delay: Duration,
    refuse_connects: u32,
    failing_commands: HashSet<usize>,
    attempts: Vec<Generation>,
    commands: Vec<RecordedCommand>,
    in_flight: usize,
    max_in_flight: usize,
    disconnects: usize,
    live: Option<LiveLink>,
}

/// A simulated device. Cheap to clone; clones share the same device.
#[derive(Clone)]
pub struct FakeFirmware {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFirmware {
    /// A device that speaks both generations and advertises nothing.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                info: DeviceInfo {
                    name: "open-air-mini".into(),
                    firmware_version: "2024.6.1".into(),
                    model: Some("Open AIR Mini".into()),
                    mac_address: Some("AA:BB:CC:DD:EE:FF".into()),
                },
                entities: Vec::new(),
                accepts_modern: true,
                accepts_legacy: true,
                modern_available: true,
                legacy_available: true,
                reject_auth: false,
                handshake_delay: Duration::ZERO,
                advert_gap: Duration::ZERO,
                command_delay: Duration::ZERO,
                refuse_connects: 0,
                failing_commands: HashSet::new(),
                attempts: Vec::new(),
                commands: Vec::new(),
                in_flight: 0,
                max_in_flight: 0,
                disconnects: 0,
                live: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ───────────────────────────────────────────────────

    pub fn with_entities(self, entities: Vec<FakeEntity>) -> Self {
        self.lock().entities = entities;
        self
    }

    /// Older firmware: the modern handshake is rejected.
    pub fn legacy_only(self) -> Self {
        self.set_accepts(Generation::Modern, false);
        self
    }

    /// Newest firmware: legacy auth was removed.
    pub fn modern_only(self) -> Self {
        self.set_accepts(Generation::Legacy, false);
        self
    }

    pub fn with_handshake_delay(self, delay: Duration) -> Self {
        self.lock().handshake_delay = delay;
        self
    }

    /// Spread advertisements out instead of sending them in one burst.
    pub fn with_advert_gap(self, gap: Duration) -> Self {
        self.lock().advert_gap = gap;
        self
    }

    pub fn with_command_delay(self, delay: Duration) -> Self {
        self.lock().command_delay = delay;
        self
    }

    pub fn set_accepts(&self, generation: Generation, accepts: bool) {
        let mut s = self.lock();
        match generation {
            Generation::Modern => s.accepts_modern = accepts,
            Generation::Legacy => s.accepts_legacy = accepts,
        }
    }

    /// Make the factory refuse to build a client for `generation`.
    pub fn set_available(&self, generation: Generation, available: bool) {
        let mut s = self.lock();
        match generation {
            Generation::Modern => s.modern_available = available,
            Generation::Legacy => s.legacy_available = available,
        }
    }

    pub fn set_reject_auth(&self, reject: bool) {
        self.lock().reject_auth = reject;
    }

    /// The next `count` handshakes fail with connection refused.
    pub fn refuse_next_connects(&self, count: u32) {
        self.lock().refuse_connects = count;
    }

    /// The `ordinal`-th command (1-based, across the device lifetime) fails.
    pub fn fail_command(&self, ordinal: usize) {
        self.lock().failing_commands.insert(ordinal);
    }

    // ── Live pushes ─────────────────────────────────────────────────

    pub fn push_fan_state(&self, key: u32, on: bool, speed_level: i32) {
        self.push(
            key,
            "Fan",
            &json!({ "state": on, "speedLevel": speed_level }),
            LegacyMessage::FanState {
                key,
                state: on,
                speed_level: Some(speed_level),
            },
        );
    }

    /// `missing` of `None` mimics firmware that omits the flag.
    pub fn push_sensor_state(&self, key: u32, value: f32, missing: Option<bool>) {
        let mut payload = json!({ "state": value });
        if let Some(m) = missing {
            payload["missingState"] = json!(m);
        }
        self.push(
            key,
            "Sensor",
            &payload,
            LegacyMessage::SensorState {
                key,
                state: value,
                missing_state: missing,
            },
        );
    }

    pub fn push_switch_state(&self, key: u32, on: bool) {
        self.push(
            key,
            "Switch",
            &json!({ "state": on }),
            LegacyMessage::SwitchState { key, state: on },
        );
    }

    pub fn push_valve_state(&self, key: u32, position: f32, current_operation: u32) {
        self.push(
            key,
            "Valve",
            &json!({ "position": position, "currentOperation": current_operation }),
            LegacyMessage::ValveState {
                key,
                position,
                current_operation,
            },
        );
    }

    fn push(&self, key: u32, entity_type: &str, modern: &serde_json::Value, legacy: LegacyMessage) {
        let s = self.lock();
        match &s.live {
            Some(LiveLink::Modern(tx)) => {
                let _ = tx.try_send(ModernMessage::State {
                    key,
                    entity_type: entity_type.into(),
                    state: modern.clone(),
                });
            }
            Some(LiveLink::Legacy(tx)) => {
                let _ = tx.try_send(legacy);
            }
            None => {}
        }
    }

    /// Simulate the device vanishing (power loss, Wi-Fi drop).
    pub fn drop_connection(&self, reason: &str) {
        let link = self.lock().live.take();
        tracing::debug!(reason, linked = link.is_some(), "fake firmware dropping connection");
        match link {
            Some(LiveLink::Modern(tx)) => {
                let _ = tx.try_send(ModernMessage::Closed {
                    reason: Some(reason.into()),
                });
            }
            Some(LiveLink::Legacy(tx)) => {
                let _ = tx.try_send(LegacyMessage::Disconnected {
                    reason: Some(reason.into()),
                });
            }
            None => {}
        }
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Every handshake attempted, in order.
    pub fn connect_attempts(&self) -> Vec<Generation> {
        self.lock().attempts.clone()
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.lock().commands.clone()
    }

    /// Highest number of commands ever executing at the same time.
    pub fn max_concurrent_commands(&self) -> usize {
        self.lock().max_in_flight
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    pub fn is_linked(&self) -> bool {
        self.lock().live.is_some()
    }

    // ── Client plumbing ─────────────────────────────────────────────

    async fn handshake(&self, generation: Generation) -> Result<(DeviceInfo, Vec<FakeEntity>, Duration), Error> {
        let delay = {
            let mut s = self.lock();
            s.attempts.push(generation);
            s.handshake_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut s = self.lock();
        if s.refuse_connects > 0 {
            s.refuse_connects -= 1;
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into());
        }
        let accepts = match generation {
            Generation::Modern => s.accepts_modern,
            Generation::Legacy => s.accepts_legacy,
        };
        if !accepts {
            return Err(Error::Handshake {
                message: format!("firmware rejected the {generation} handshake"),
            });
        }
        if s.reject_auth {
            return Err(Error::Authentication {
                message: "invalid credentials".into(),
            });
        }
        Ok((s.info.clone(), s.entities.clone(), s.advert_gap))
    }

    async fn record(&self, command: RecordedCommand) -> Result<(), Error> {
        let (ordinal, delay, fail) = {
            let mut s = self.lock();
            if s.live.is_none() {
                return Err(Error::Closed { reason: None });
            }
            s.commands.push(command);
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            let ordinal = s.commands.len();
            (ordinal, s.command_delay, s.failing_commands.contains(&ordinal))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.lock().in_flight -= 1;
        if fail {
            return Err(Error::Rejected {
                message: format!("command #{ordinal} rejected"),
            });
        }
        Ok(())
    }

    fn hang_up(&self) {
        let mut s = self.lock();
        s.disconnects += 1;
        s.live = None;
    }
}

fn send_all<M: Send + 'static>(tx: mpsc::Sender<M>, messages: Vec<M>, gap: Duration) {
    if gap.is_zero() {
        for message in messages {
            let _ = tx.try_send(message);
        }
        return;
    }
    tokio::spawn(async move {
        for message in messages {
            tokio::time::sleep(gap).await;
            if tx.send(message).await.is_err() {
                break;
            }
        }
    });
}

fn modern_type_tag(kind: FakeEntityKind) -> &'static str {
    match kind {
        FakeEntityKind::Fan => "Fan",
        FakeEntityKind::Sensor => "Sensor",
        FakeEntityKind::BinarySensor => "BinarySensor",
        FakeEntityKind::Switch => "Switch",
        FakeEntityKind::Valve => "Valve",
        FakeEntityKind::Button => "Button",
    }
}

fn legacy_kind(kind: FakeEntityKind) -> LegacyEntityKind {
    match kind {
        FakeEntityKind::Fan => LegacyEntityKind::Fan,
        FakeEntityKind::Sensor => LegacyEntityKind::Sensor,
        FakeEntityKind::BinarySensor => LegacyEntityKind::BinarySensor,
        FakeEntityKind::Switch => LegacyEntityKind::Switch,
        FakeEntityKind::Valve => LegacyEntityKind::Valve,
        FakeEntityKind::Button => LegacyEntityKind::Button,
    }
}

// ── Modern client ───────────────────────────────────────────────────

struct FakeModernClient {
    firmware: FakeFirmware,
}

#[async_trait]
impl ModernClient for FakeModernClient {
    async fn connect(&self) -> Result<ModernSession, Error> {
        let (info, entities, gap) = self.firmware.handshake(Generation::Modern).await?;
        let (tx, rx) = mpsc::channel(MESSAGE_CAPACITY);
        let adverts = entities
            .iter()
            .map(|e| {
                ModernMessage::Entity(ModernEntity {
                    key: e.key,
                    name: e.name.clone(),
                    object_id: e.object_id(),
                    entity_type: modern_type_tag(e.kind).into(),
                    config: json!({ "objectId": e.object_id(), "disabledByDefault": false }),
                })
            })
            .collect();
        self.firmware.lock().live = Some(LiveLink::Modern(tx.clone()));
        send_all(tx, adverts, gap);
        Ok(ModernSession { info, messages: rx })
    }

    async fn fan_command(&self, key: u32, command: ModernFanCommand) -> Result<(), Error> {
        self.firmware
            .record(RecordedCommand::Fan {
                generation: Generation::Modern,
                key,
                on: command.state,
                speed_level: command.speed_level,
            })
            .await
    }

    async fn switch_command(&self, key: u32, state: bool) -> Result<(), Error> {
        self.firmware
            .record(RecordedCommand::Switch {
                generation: Generation::Modern,
                key,
                on: state,
            })
            .await
    }

    async fn valve_command(&self, key: u32, command: ModernValveCommand) -> Result<(), Error> {
        self.firmware
            .record(RecordedCommand::Valve {
                generation: Generation::Modern,
                key,
                position: command.position,
                stop: command.stop,
            })
            .await
    }

    async fn button_press(&self, key: u32) -> Result<(), Error> {
        self.firmware
            .record(RecordedCommand::Button {
                generation: Generation::Modern,
                key,
            })
            .await
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.firmware.hang_up();
        Ok(())
    }
}

// ── Legacy client ───────────────────────────────────────────────────

struct FakeLegacyClient {
    firmware: FakeFirmware,
}

#[async_trait]
impl LegacyClient for FakeLegacyClient {
    async fn connect(&self) -> Result<LegacySession, Error> {
        let (info, entities, gap) = self.firmware.handshake(Generation::Legacy).await?;
        let (tx, rx) = mpsc::channel(MESSAGE_CAPACITY);
        let adverts = entities
            .iter()
            .map(|e| {
                LegacyMessage::ListEntity(LegacyEntity {
                    key: e.key,
                    name: e.name.clone(),
                    object_id: e.object_id(),
                    kind: legacy_kind(e.kind),
                    unique_id: Some(format!("openair{}", e.object_id())),
                    device_class: None,
                    unit_of_measurement: None,
                    supported_speed_count: (e.kind == FakeEntityKind::Fan).then_some(10),
                    supports_position: e.kind == FakeEntityKind::Valve,
                })
            })
            .collect();
        self.firmware.lock().live = Some(LiveLink::Legacy(tx.clone()));
        send_all(tx, adverts, gap);
        Ok(LegacySession { info, messages: rx })
    }

    async fn fan_command(
        &self,
        key: u32,
        state: Option<bool>,
        speed_level: Option<i32>,
    ) -> Result<(), Error> {
        self.firmware
            .record(RecordedCommand::Fan {
                generation: Generation::Legacy,
                key,
                on: state,
                speed_level,
            })
            .await
    }

    async fn switch_command(&self, key: u32, state: bool) -> Result<(), Error> {
        self.firmware
            .record(RecordedCommand::Switch {
                generation: Generation::Legacy,
                key,
                on: state,
            })
            .await
    }

    async fn valve_command(
        &self,
        key: u32,
        position: Option<f32>,
        stop: bool,
    ) -> Result<(), Error> {
        self.firmware
            .record(RecordedCommand::Valve {
                generation: Generation::Legacy,
                key,
                position,
                stop,
            })
            .await
    }

    async fn button_command(&self, key: u32) -> Result<(), Error> {
        self.firmware
            .record(RecordedCommand::Button {
                generation: Generation::Legacy,
                key,
            })
            .await
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.firmware.hang_up();
        Ok(())
    }
}

// ── Factory ─────────────────────────────────────────────────────────

impl ClientFactory for FakeFirmware {
    fn modern(
        &self,
        _endpoint: &DeviceEndpoint,
        _credential: ModernCredential,
    ) -> Result<Arc<dyn ModernClient>, Error> {
        if !self.lock().modern_available {
            return Err(Error::Unavailable {
                generation: Generation::Modern,
                reason: "client library not linked".into(),
            });
        }
        Ok(Arc::new(FakeModernClient {
            firmware: self.clone(),
        }))
    }

    fn legacy(
        &self,
        _endpoint: &DeviceEndpoint,
        _auth: LegacyAuth,
    ) -> Result<Arc<dyn LegacyClient>, Error> {
        if !self.lock().legacy_available {
            return Err(Error::Unavailable {
                generation: Generation::Legacy,
                reason: "client library not linked".into(),
            });
        }
        Ok(Arc::new(FakeLegacyClient {
            firmware: self.clone(),
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::endpoint::Credential;

    fn endpoint() -> DeviceEndpoint {
        DeviceEndpoint::with_default_port("fake.local", Credential::None)
    }

    fn modern_client(fw: &FakeFirmware) -> Arc<dyn ModernClient> {
        fw.modern(
            &endpoint(),
            ModernCredential {
                encryption_key: secrecy::SecretString::from("a2V5".to_string()),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn modern_handshake_bursts_adverts() {
        let fw = FakeFirmware::new().with_entities(vec![
            FakeEntity::new(1, "Fan", FakeEntityKind::Fan),
            FakeEntity::new(2, "CO2 Sensor 2", FakeEntityKind::Sensor),
        ]);
        let mut session = modern_client(&fw).connect().await.unwrap();

        let Some(ModernMessage::Entity(first)) = session.messages.recv().await else {
            panic!("expected entity advert");
        };
        assert_eq!(first.entity_type, "Fan");
        let Some(ModernMessage::Entity(second)) = session.messages.recv().await else {
            panic!("expected entity advert");
        };
        assert_eq!(second.object_id, "co2_sensor_2");
        assert_eq!(fw.connect_attempts(), vec![Generation::Modern]);
    }

    #[tokio::test]
    async fn legacy_only_firmware_rejects_modern_handshake() {
        let fw = FakeFirmware::new().legacy_only();
        let err = modern_client(&fw).connect().await.unwrap_err();
        assert!(matches!(err, Error::Handshake { .. }), "got {err:?}");

        let legacy = fw.legacy(&endpoint(), LegacyAuth::None).unwrap();
        assert_ok!(legacy.connect().await);
        assert_eq!(
            fw.connect_attempts(),
            vec![Generation::Modern, Generation::Legacy]
        );
    }

    #[tokio::test]
    async fn unavailable_generation_fails_at_construction() {
        let fw = FakeFirmware::new();
        fw.set_available(Generation::Legacy, false);
        let err = fw.legacy(&endpoint(), LegacyAuth::None).err().unwrap();
        assert!(matches!(err, Error::Unavailable { .. }));
    }

    #[tokio::test]
    async fn drop_connection_sends_closed_then_ends_stream() {
        let fw = FakeFirmware::new();
        let mut session = modern_client(&fw).connect().await.unwrap();
        fw.drop_connection("wifi lost");

        let Some(ModernMessage::Closed { reason }) = session.messages.recv().await else {
            panic!("expected close");
        };
        assert_eq!(reason.as_deref(), Some("wifi lost"));
        assert!(session.messages.recv().await.is_none());
        assert!(!fw.is_linked());
    }

    #[tokio::test]
    async fn scripted_command_failure_hits_only_that_ordinal() {
        let fw = FakeFirmware::new();
        fw.fail_command(2);
        let client = modern_client(&fw);
        let _session = client.connect().await.unwrap();

        assert_ok!(client.switch_command(5, true).await);
        assert_err!(client.switch_command(5, false).await);
        assert_ok!(client.button_press(6).await);
        assert_eq!(fw.commands().len(), 3);
    }

    #[tokio::test]
    async fn commands_without_a_link_are_refused() {
        let fw = FakeFirmware::new();
        let client = modern_client(&fw);
        let err = client.switch_command(5, true).await.unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));
        assert!(fw.commands().is_empty());
    }
}
