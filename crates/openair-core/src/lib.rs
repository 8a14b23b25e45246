//! Connection orchestration for Open AIR ventilation units.
//!
//! This crate sits between the two existing ESPHome native API client
//! generations (`openair-api`) and whatever integration layer drives the
//! device:
//!
//! - **[`Orchestrator`]**: One device session end to end.
//!   [`connect()`](Orchestrator::connect) picks a protocol generation (from
//!   the [`VersionCache`] or by probing Modern, then Legacy), waits for the
//!   entity burst to settle and starts forwarding [`SessionEvent`]s.
//!   Unexpected drops go to the reconnection controller.
//!
//! - **[`ProtocolAdapter`]**: `Modern | Legacy` sum type. Each variant owns
//!   its client and a fresh [`EntityRegistry`], normalizing advertisements
//!   and state pushes into [`EntityInfo`] and [`StateEvent`].
//!
//! - **[`CommandSerializer`]**: One command on the wire at a time, in
//!   submission order. [`Debouncer`] coalesces rapid writes per target.
//!
//! - **[`ReconnectController`]**: Exponential backoff with a single timer
//!   and a bounded attempt budget.
//!
//! - **[`Hub`]**: Owns the shared version cache and the client factory.

pub mod adapter;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod hub;
pub mod model;
pub mod reconnect;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{AdapterEvent, AdapterOptions, ProtocolAdapter};
pub use command::{Command, CommandSerializer, CommandTarget, Debouncer, FanUpdate};
pub use config::SessionConfig;
pub use controller::{ConnectionState, Orchestrator, ProbeReport};
pub use error::CoreError;
pub use events::SessionEvent;
pub use hub::Hub;
pub use model::{
    EntityInfo, EntityKey, EntityKind, MeasurementType, StateEvent, StateFields, ValveOperation,
    compute_capability_id, detect_measurement_type, extract_sensor_slot,
};
pub use reconnect::{ReconnectConfig, ReconnectController, ReconnectState, backoff_delay};
pub use store::{EntityRegistry, VersionCache};

pub use openair_api::{Credential, DeviceEndpoint, DeviceInfo, Generation};
