// ── Modern adapter ──
//
// Newer firmware: noise-encrypted transport, pre-shared key only.

use std::sync::Arc;

use serde_json::Value;

use openair_api::{
    ClientFactory, Credential, DeviceEndpoint, DeviceInfo, Error, Generation, ModernClient,
    ModernCredential, ModernFanCommand, ModernMessage, ModernValveCommand,
};

use super::{AdapterCore, Normalized, WireMessage, kind_from_tag};
use crate::error::CoreError;
use crate::model::{AdapterHandle, EntityInfo, EntityKey, EntityKind, StateFields, ValveOperation};

pub struct ModernAdapter {
    client: Arc<dyn ModernClient>,
    pub(super) core: AdapterCore,
}

impl ModernAdapter {
    pub(super) fn build(
        factory: &dyn ClientFactory,
        endpoint: &DeviceEndpoint,
        core: AdapterCore,
    ) -> Result<Self, Error> {
        let Credential::EncryptionKey(key) = &endpoint.credential else {
            return Err(Error::UnsupportedCredential {
                generation: Generation::Modern,
                credential: endpoint.credential.kind(),
            });
        };
        let client = factory.modern(
            endpoint,
            ModernCredential {
                encryption_key: key.clone(),
            },
        )?;
        Ok(Self { client, core })
    }

    pub(super) fn client(&self) -> &Arc<dyn ModernClient> {
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
        let command = ModernFanCommand {
            state: on,
            speed_level: speed,
        };
        Ok(self.client.fan_command(key, command).await?)
    }

    pub(super) async fn switch(&self, key: u32, on: bool) -> Result<(), CoreError> {
        Ok(self.client.switch_command(key, on).await?)
    }

    pub(super) async fn valve(&self, key: u32, position: Option<f32>, stop: bool) -> Result<(), CoreError> {
        Ok(self
            .client
            .valve_command(key, ModernValveCommand { position, stop })
            .await?)
    }

    pub(super) async fn button(&self, key: u32) -> Result<(), CoreError> {
        Ok(self.client.button_press(key).await?)
    }
}

impl WireMessage for ModernMessage {
    fn normalize(self, generation: Generation) -> Normalized {
        match self {
            Self::Entity(entity) => {
                let kind = kind_from_tag(&entity.entity_type);
                Normalized::Entity(EntityInfo {
                    key: EntityKey(entity.key),
                    name: entity.name,
                    object_id: entity.object_id,
                    kind,
                    config: entity.config,
                    handle: (kind != EntityKind::Other).then_some(AdapterHandle {
                        generation,
                        wire_key: entity.key,
                    }),
                })
            }
            Self::State {
                key,
                entity_type,
                state,
            } => Normalized::State {
                key: EntityKey(key),
                fields: state_fields(kind_from_tag(&entity_type), state),
            },
            Self::Closed { reason } => Normalized::Closed { reason },
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn as_f32(value: &Value) -> Option<f32> {
    value.as_f64().map(|v| v as f32)
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

fn state_fields(kind: EntityKind, state: Value) -> StateFields {
    let on = state["state"].as_bool().unwrap_or(false);
    let missing = state["missingState"].as_bool().unwrap_or(false);
    match kind {
        EntityKind::Fan => StateFields::Fan {
            on,
            speed_level: as_u32(&state["speedLevel"]),
        },
        EntityKind::Sensor => StateFields::Sensor {
            value: as_f32(&state["state"]).unwrap_or(f32::NAN),
            missing,
        },
        EntityKind::BinarySensor => StateFields::BinarySensor { on, missing },
        EntityKind::Switch => StateFields::Switch { on },
        EntityKind::Valve => StateFields::valve(
            as_f32(&state["position"]),
            ValveOperation::from_json(&state["currentOperation"]),
        ),
        _ => StateFields::Other { raw: state },
    }
}
