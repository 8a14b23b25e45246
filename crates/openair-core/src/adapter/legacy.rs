// ── Legacy adapter ──
//
// Older firmware: plaintext or password auth, optionally an encryption key.
// The only adapter able to talk to pre-noise firmware.

use std::sync::Arc;

use serde_json::json;

use openair_api::{
    ClientFactory, Credential, DeviceEndpoint, DeviceInfo, Error, Generation, LegacyAuth,
    LegacyClient, LegacyEntityKind, LegacyMessage,
};

use super::{AdapterCore, Normalized, WireMessage};
use crate::error::CoreError;
use crate::model::{AdapterHandle, EntityInfo, EntityKey, EntityKind, StateFields, ValveOperation};

pub struct LegacyAdapter {
    client: Arc<dyn LegacyClient>,
    pub(super) core: AdapterCore,
}

impl LegacyAdapter {
    pub(super) fn build(
        factory: &dyn ClientFactory,
        endpoint: &DeviceEndpoint,
        core: AdapterCore,
    ) -> Result<Self, Error> {
        let auth = match &endpoint.credential {
            Credential::EncryptionKey(key) => LegacyAuth::EncryptionKey(key.clone()),
            Credential::Password(password) => LegacyAuth::Password(password.clone()),
            Credential::None => LegacyAuth::None,
        };
        let client = factory.legacy(endpoint, auth)?;
        Ok(Self { client, core })
    }

    pub(super) fn client(&self) -> &Arc<dyn LegacyClient> {
        &self.client
    }

    pub(super) async fn connect(&self, wait_for_entities: bool) -> Result<DeviceInfo, Error> {
        let handshake = async {
            let session = self.client.connect().await?;
            Ok::<_, Error>((session.info, session.messages))
        };
        self.core.establish(handshake, wait_for_entities).await
    }

    pub(super) async fn fan(&self, key: u32, on: Option<bool>, speed: Option<i32>) -> Result<(), CoreError> {
        Ok(self.client.fan_command(key, on, speed).await?)
    }

    pub(super) async fn switch(&self, key: u32, on: bool) -> Result<(), CoreError> {
        Ok(self.client.switch_command(key, on).await?)
    }

    pub(super) async fn valve(&self, key: u32, position: Option<f32>, stop: bool) -> Result<(), CoreError> {
        Ok(self.client.valve_command(key, position, stop).await?)
    }

    pub(super) async fn button(&self, key: u32) -> Result<(), CoreError> {
        Ok(self.client.button_command(key).await?)
    }
}

fn canonical_kind(kind: &LegacyEntityKind) -> EntityKind {
    match kind {
        LegacyEntityKind::Fan => EntityKind::Fan,
        LegacyEntityKind::Sensor => EntityKind::Sensor,
        LegacyEntityKind::BinarySensor => EntityKind::BinarySensor,
        LegacyEntityKind::Switch => EntityKind::Switch,
        LegacyEntityKind::Valve => EntityKind::Valve,
        LegacyEntityKind::Button => EntityKind::Button,
        LegacyEntityKind::Other(_) => EntityKind::Other,
    }
}

impl WireMessage for LegacyMessage {
    fn normalize(self, generation: Generation) -> Normalized {
        let (key, fields) = match self {
            Self::ListEntity(entity) => {
                let kind = canonical_kind(&entity.kind);
                let config = json!({
                    "uniqueId": entity.unique_id,
                    "deviceClass": entity.device_class,
                    "unitOfMeasurement": entity.unit_of_measurement,
                    "supportedSpeedCount": entity.supported_speed_count,
                    "supportsPosition": entity.supports_position,
                });
                return Normalized::Entity(EntityInfo {
                    key: EntityKey(entity.key),
                    name: entity.name,
                    object_id: entity.object_id,
                    kind,
                    config,
                    handle: (kind != EntityKind::Other).then_some(AdapterHandle {
                        generation,
                        wire_key: entity.key,
                    }),
                });
            }
            Self::FanState {
                key,
                state,
                speed_level,
            } => (
                key,
                StateFields::Fan {
                    on: state,
                    speed_level: speed_level.and_then(|s| u32::try_from(s).ok()),
                },
            ),
            Self::SensorState {
                key,
                state,
                missing_state,
            } => (
                key,
                StateFields::Sensor {
                    value: state,
                    missing: missing_state.unwrap_or(false),
                },
            ),
            Self::BinarySensorState {
                key,
                state,
                missing_state,
            } => (
                key,
                StateFields::BinarySensor {
                    on: state,
                    missing: missing_state.unwrap_or(false),
                },
            ),
            Self::SwitchState { key, state } => (key, StateFields::Switch { on: state }),
            Self::ValveState {
                key,
                position,
                current_operation,
            } => (
                key,
                StateFields::valve(
                    Some(position),
                    ValveOperation::from_code(u64::from(current_operation)),
                ),
            ),
            Self::Disconnected { reason } => return Normalized::Closed { reason },
        };
        Normalized::State {
            key: EntityKey(key),
            fields,
        }
    }
}
