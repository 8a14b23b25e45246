// ── Modern client surface ──
//
// Shapes produced by the client for newer firmware. Entities and states
// arrive loosely typed: a type tag plus a JSON payload whose keys follow
// the firmware's camelCase naming.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::endpoint::DeviceInfo;
use crate::error::Error;

/// An entity advertisement from the modern client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModernEntity {
    pub key: u32,
    pub name: String,
    pub object_id: String,
    /// Type tag such as `"Fan"`, `"Sensor"`, `"BinarySensor"`.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Everything else the firmware advertised for this entity.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Anything the modern client pushes after the handshake.
#[derive(Debug, Clone)]
pub enum ModernMessage {
    Entity(ModernEntity),
    /// State push, e.g. `{"state": true, "speedLevel": 3}` for a fan.
    State {
        key: u32,
        entity_type: String,
        state: serde_json::Value,
    },
    /// The transport went away. Always the last message of a session.
    Closed { reason: Option<String> },
}

/// Fan command in the modern client's vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModernFanCommand {
    pub state: Option<bool>,
    pub speed_level: Option<i32>,
}

/// Valve command in the modern client's vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ModernValveCommand {
    pub position: Option<f32>,
    pub stop: bool,
}

/// A live handshake: device metadata plus the push channel.
#[derive(Debug)]
pub struct ModernSession {
    pub info: DeviceInfo,
    pub messages: mpsc::Receiver<ModernMessage>,
}

/// The client for newer firmware. Only ever built with an encryption key.
#[async_trait]
pub trait ModernClient: Send + Sync {
    /// Open the transport and complete the encrypted handshake.
    async fn connect(&self) -> Result<ModernSession, Error>;

    async fn fan_command(&self, key: u32, command: ModernFanCommand) -> Result<(), Error>;

    async fn switch_command(&self, key: u32, state: bool) -> Result<(), Error>;

    async fn valve_command(&self, key: u32, command: ModernValveCommand) -> Result<(), Error>;

    async fn button_press(&self, key: u32) -> Result<(), Error>;

    async fn disconnect(&self) -> Result<(), Error>;
}

/// Credential the modern client is built with.
#[derive(Debug, Clone)]
pub struct ModernCredential {
    pub encryption_key: SecretString,
}
