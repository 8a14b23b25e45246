// ── Legacy client surface ──
//
// Shapes produced by the client that still speaks the old handshake.
// Messages are strongly typed per entity kind, mirroring the firmware's
// `ListEntities*Response` / `*StateResponse` pairs.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::endpoint::DeviceInfo;
use crate::error::Error;

/// Entity kinds the legacy client knows how to list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyEntityKind {
    Fan,
    Sensor,
    BinarySensor,
    Switch,
    Valve,
    Button,
    /// Listed by firmware, but not modeled by this client.
    Other(String),
}

/// An entity advertisement from the legacy client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyEntity {
    pub key: u32,
    pub name: String,
    pub object_id: String,
    pub kind: LegacyEntityKind,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    /// Fans only: number of discrete speed levels.
    #[serde(default)]
    pub supported_speed_count: Option<u32>,
    /// Valves only.
    #[serde(default)]
    pub supports_position: bool,
}

/// Anything the legacy client pushes after the handshake.
#[derive(Debug, Clone)]
pub enum LegacyMessage {
    ListEntity(LegacyEntity),
    FanState {
        key: u32,
        state: bool,
        speed_level: Option<i32>,
    },
    SensorState {
        key: u32,
        state: f32,
        /// Older firmware omits this field entirely.
        missing_state: Option<bool>,
    },
    BinarySensorState {
        key: u32,
        state: bool,
        missing_state: Option<bool>,
    },
    SwitchState {
        key: u32,
        state: bool,
    },
    ValveState {
        key: u32,
        position: f32,
        /// 0 = idle, 1 = opening, 2 = closing.
        current_operation: u32,
    },
    /// The socket closed. Always the last message of a session.
    Disconnected { reason: Option<String> },
}

/// A live handshake: device metadata plus the push channel.
#[derive(Debug)]
pub struct LegacySession {
    pub info: DeviceInfo,
    pub messages: mpsc::Receiver<LegacyMessage>,
}

/// How the legacy client authenticates.
#[derive(Debug, Clone, Default)]
pub enum LegacyAuth {
    Password(SecretString),
    EncryptionKey(SecretString),
    #[default]
    None,
}

/// The client for older firmware (also speaks to newer firmware that still
/// accepts its handshake).
#[async_trait]
pub trait LegacyClient: Send + Sync {
    async fn connect(&self) -> Result<LegacySession, Error>;

    async fn fan_command(
        &self,
        key: u32,
        state: Option<bool>,
        speed_level: Option<i32>,
    ) -> Result<(), Error>;

    async fn switch_command(&self, key: u32, state: bool) -> Result<(), Error>;

    async fn valve_command(&self, key: u32, position: Option<f32>, stop: bool)
    -> Result<(), Error>;

    async fn button_command(&self, key: u32) -> Result<(), Error>;

    async fn disconnect(&self) -> Result<(), Error>;
}
