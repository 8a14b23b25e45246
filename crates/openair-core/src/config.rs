// ── Runtime session configuration ──
//
// Describes *how* to reach one device and how patient to be about it.
// Carries credential data but never touches disk; openair-config (or the
// host's own settings store) builds a `SessionConfig` and hands it in.

use std::time::Duration;

use openair_api::DeviceEndpoint;

pub use crate::reconnect::ReconnectConfig;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Configuration for one device session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: DeviceEndpoint,
    /// Bound on one adapter's handshake plus entity settling.
    pub connect_timeout: Duration,
    /// Quiet period after the first advertisement before the entity set
    /// is considered complete.
    pub settle_delay: Duration,
    /// Coalescing window for debounced writes.
    pub debounce_window: Duration,
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    pub fn new(endpoint: DeviceEndpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Serde helper: a `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
