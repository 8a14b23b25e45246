// ── Core error types ──
//
// User-facing errors from openair-core. Callers never match on raw client
// errors; the `From<openair_api::Error>` impl translates them into
// domain-appropriate variants. `ConnectionFailed` is the one exception and
// keeps the last underlying cause as its source.

use std::time::Duration;

use thiserror::Error;

use openair_api::Generation;

use crate::model::{EntityKey, EntityKind};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {endpoint}: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: openair_api::Error,
    },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    #[error("{generation} adapter unavailable: {reason}")]
    AdapterUnavailable {
        generation: Generation,
        reason: String,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection attempt superseded")]
    Superseded,

    #[error("Orchestrator destroyed")]
    Destroyed,

    // ── Entity errors ────────────────────────────────────────────────
    #[error("No {kind} entity with key {key}")]
    EntityNotFound { key: EntityKey, kind: EntityKind },

    #[error("Entity {key} has no wire mapping in this session")]
    EntityMapping { key: EntityKey },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("Command rejected by device: {message}")]
    Rejected { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

impl CoreError {
    /// Worth retrying on a later connect.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::NotConnected => true,
            Self::ConnectionFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

// ── Conversion from client errors ────────────────────────────────────

impl From<openair_api::Error> for CoreError {
    fn from(err: openair_api::Error) -> Self {
        use openair_api::Error as Api;
        match err {
            Api::Timeout { after } => Self::Timeout { after },
            Api::Authentication { message } => Self::AuthenticationFailed { message },
            e @ Api::UnsupportedCredential { .. } => Self::AuthenticationFailed {
                message: e.to_string(),
            },
            Api::Unavailable { generation, reason } => {
                Self::AdapterUnavailable { generation, reason }
            }
            Api::UnknownEntity { key } => Self::EntityMapping {
                key: EntityKey(key),
            },
            Api::Rejected { message } => Self::Rejected { message },
            Api::Closed { .. } => Self::NotConnected,
            e @ (Api::Handshake { .. } | Api::Transport(_)) => Self::Protocol {
                message: e.to_string(),
            },
        }
    }
}
