// ── Domain model ──

pub mod entity;
pub mod measurement;
pub mod state;

pub use entity::{AdapterHandle, EntityInfo, EntityKey, EntityKind};
pub use measurement::{
    MeasurementType, compute_capability_id, detect_measurement_type, extract_sensor_slot,
};
pub use state::{StateEvent, StateFields, ValveOperation};
