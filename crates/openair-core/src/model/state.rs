// ── State events ──

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::entity::{EntityInfo, EntityKind};

/// Current motion of a valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValveOperation {
    Idle,
    Opening,
    Closing,
}

impl ValveOperation {
    /// Firmware operation code: 0 idle, 1 opening, 2 closing.
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => Self::Opening,
            2 => Self::Closing,
            _ => Self::Idle,
        }
    }

    /// Parse either the numeric code or a symbolic name.
    pub fn from_json(value: &serde_json::Value) -> Self {
        if let Some(code) = value.as_u64() {
            return Self::from_code(code);
        }
        match value.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("opening" | "valve_operation_is_opening") => Self::Opening,
            Some("closing" | "valve_operation_is_closing") => Self::Closing,
            _ => Self::Idle,
        }
    }
}

/// Kind-specific fields of a state update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateFields {
    Fan {
        on: bool,
        speed_level: Option<u32>,
    },
    Sensor {
        value: f32,
        /// Firmware has no reading yet. Absent flag means `false`.
        missing: bool,
    },
    BinarySensor {
        on: bool,
        missing: bool,
    },
    Switch {
        on: bool,
    },
    Valve {
        /// 0.0 closed through 1.0 open. NaN when `missing`.
        position: f32,
        operation: ValveOperation,
        /// Firmware reported no usable position.
        missing: bool,
    },
    Other {
        raw: serde_json::Value,
    },
}

impl StateFields {
    /// Valve fields from a raw position. Absent or non-finite positions are
    /// flagged missing rather than read as closed.
    pub fn valve(position: Option<f32>, operation: ValveOperation) -> Self {
        match position.filter(|p| p.is_finite()) {
            Some(p) => Self::Valve {
                position: p.clamp(0.0, 1.0),
                operation,
                missing: false,
            },
            None => Self::Valve {
                position: f32::NAN,
                operation,
                missing: true,
            },
        }
    }
}

/// A normalized state update, tagged with the entity it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct StateEvent {
    pub kind: EntityKind,
    pub entity: Arc<EntityInfo>,
    pub fields: StateFields,
    pub received_at: DateTime<Utc>,
}

impl StateEvent {
    pub fn new(entity: Arc<EntityInfo>, fields: StateFields) -> Self {
        Self {
            kind: entity.kind,
            entity,
            fields,
            received_at: Utc::now(),
        }
    }

    /// Reading of a sensor, unless the firmware flagged it missing.
    pub fn sensor_value(&self) -> Option<f32> {
        match self.fields {
            StateFields::Sensor { value, missing } if !missing && value.is_finite() => Some(value),
            _ => None,
        }
    }

    /// Position of a valve, unless the firmware did not report one.
    pub fn valve_position(&self) -> Option<f32> {
        match self.fields {
            StateFields::Valve {
                position, missing, ..
            } if !missing => Some(position),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::EntityKey;

    #[test]
    fn valve_operation_accepts_codes_and_names() {
        assert_eq!(ValveOperation::from_json(&json!(1)), ValveOperation::Opening);
        assert_eq!(ValveOperation::from_json(&json!("CLOSING")), ValveOperation::Closing);
        assert_eq!(ValveOperation::from_json(&json!(null)), ValveOperation::Idle);
        assert_eq!(ValveOperation::from_code(9), ValveOperation::Idle);
    }

    #[test]
    fn missing_sensor_has_no_value() {
        let entity = Arc::new(EntityInfo {
            key: EntityKey(3),
            name: "Humidity".into(),
            object_id: "humidity".into(),
            kind: EntityKind::Sensor,
            config: serde_json::Value::Null,
            handle: None,
        });
        let present = StateEvent::new(
            Arc::clone(&entity),
            StateFields::Sensor {
                value: 41.5,
                missing: false,
            },
        );
        let missing = StateEvent::new(
            entity,
            StateFields::Sensor {
                value: f32::NAN,
                missing: true,
            },
        );
        assert_eq!(present.kind, EntityKind::Sensor);
        assert_eq!(present.sensor_value(), Some(41.5));
        assert_eq!(missing.sensor_value(), None);
    }

    #[test]
    fn valve_without_a_usable_position_is_missing() {
        let entity = Arc::new(EntityInfo {
            key: EntityKey(5),
            name: "Bypass Valve".into(),
            object_id: "bypass_valve".into(),
            kind: EntityKind::Valve,
            config: serde_json::Value::Null,
            handle: None,
        });
        let absent = StateEvent::new(
            Arc::clone(&entity),
            StateFields::valve(None, ValveOperation::Idle),
        );
        let nan = StateEvent::new(
            Arc::clone(&entity),
            StateFields::valve(Some(f32::NAN), ValveOperation::Opening),
        );
        let over = StateEvent::new(entity, StateFields::valve(Some(1.4), ValveOperation::Idle));

        assert!(matches!(
            absent.fields,
            StateFields::Valve { missing: true, .. }
        ));
        assert_eq!(absent.valve_position(), None);
        assert_eq!(nan.valve_position(), None);
        assert_eq!(over.valve_position(), Some(1.0));
    }

    #[test]
    fn fields_serialize_with_type_tag() {
        let fields = StateFields::Fan {
            on: true,
            speed_level: Some(4),
        };
        let value = serde_json::to_value(&fields).unwrap_or_default();
        assert_eq!(value, json!({ "type": "fan", "on": true, "speed_level": 4 }));
    }
}
