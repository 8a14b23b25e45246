// ── Session events ──

use std::sync::Arc;

use openair_api::{DeviceInfo, Generation};

use crate::model::{EntityInfo, StateEvent};

/// Broadcast to every subscriber of an orchestrator, in order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session is live. Every entity of the initial burst has already
    /// been announced through `EntityDiscovered`.
    Connected {
        generation: Generation,
        device: DeviceInfo,
    },
    /// The session dropped unexpectedly. Never sent for a caller-initiated
    /// disconnect.
    Disconnected { reason: Option<String> },
    EntityDiscovered(Arc<EntityInfo>),
    StateChanged(StateEvent),
    /// Non-fatal problem after the session came up.
    Error { message: String },
    /// Reconnection gave up. The orchestrator stays down until the next
    /// caller-initiated connect.
    ReconnectFailed { attempts: u32 },
}
