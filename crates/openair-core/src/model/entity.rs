// ── Entity domain types ──
//
// One normalized shape for whatever either client generation advertised.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use openair_api::Generation;

use super::measurement::{self, MeasurementType};

/// Numeric entity key as advertised by the firmware.
///
/// Unique within one session only. Firmware may hand out the same values
/// again after a reconnect (or a generation switch) for different entities,
/// so a key is never trusted across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(pub u32);

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntityKey {
    fn from(key: u32) -> Self {
        Self(key)
    }
}

/// Canonical entity kind, normalized from both client generations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum EntityKind {
    Fan,
    Sensor,
    BinarySensor,
    Switch,
    Valve,
    Button,
    Other,
}

/// How the adapter that produced an entity addresses it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterHandle {
    pub generation: Generation,
    pub wire_key: u32,
}

/// A normalized entity advertisement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub key: EntityKey,
    /// Display name, e.g. `"CO2 Sensor 2"`.
    pub name: String,
    pub object_id: String,
    pub kind: EntityKind,
    /// Adapter-specific advertisement payload, kept for diagnostics and for
    /// external drivers that need fields the uniform model leaves out.
    #[serde(default)]
    pub config: serde_json::Value,
    /// `None` for entities no command can be routed to.
    #[serde(default)]
    pub handle: Option<AdapterHandle>,
}

impl EntityInfo {
    /// Measurement type of a sensor, classified from its name.
    pub fn measurement(&self) -> Option<MeasurementType> {
        match self.kind {
            EntityKind::Sensor => measurement::detect_measurement_type(&self.name),
            _ => None,
        }
    }

    /// Physical sensor header this entity reads from.
    pub fn sensor_slot(&self) -> u8 {
        measurement::extract_sensor_slot(&self.name)
    }

    /// Capability channel this sensor maps onto, if it is a known measurement.
    pub fn capability_id(&self) -> Option<String> {
        self.measurement()
            .map(|m| measurement::compute_capability_id(m, Some(self.sensor_slot())))
    }
}
