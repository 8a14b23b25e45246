use std::time::Duration;

use thiserror::Error;

use crate::generation::Generation;

/// Top-level error type for the `openair-api` crate.
///
/// Covers every failure mode of the wire seam: handshake, authentication,
/// transport, and per-entity commands. `openair-core` maps these into
/// domain-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Handshake ───────────────────────────────────────────────────
    /// Handshake did not complete before the connect deadline.
    #[error("Handshake timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    /// The firmware answered with a framing or handshake this client
    /// cannot parse (e.g. old firmware talking to the modern client).
    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    // ── Authentication ──────────────────────────────────────────────
    /// Credential rejected by the firmware.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The client generation cannot carry this kind of credential.
    #[error("{generation} client does not support {credential} credentials")]
    UnsupportedCredential {
        generation: Generation,
        credential: &'static str,
    },

    // ── Client availability ─────────────────────────────────────────
    /// The underlying client implementation could not be created.
    #[error("{generation} client unavailable: {reason}")]
    Unavailable {
        generation: Generation,
        reason: String,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// Socket-level failure (connection refused, reset, DNS, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The session was closed, by the peer or locally.
    #[error("Connection closed{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed { reason: Option<String> },

    // ── Commands ────────────────────────────────────────────────────
    /// No wire key is known for the entity a command referenced.
    #[error("No wire mapping for entity key {key}")]
    UnknownEntity { key: u32 },

    /// The firmware refused or failed to apply a command.
    #[error("Command rejected: {message}")]
    Rejected { message: String },
}

impl Error {
    /// Returns `true` if the failure is worth retrying on the same generation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport(_) | Self::Closed { .. }
        )
    }

    /// Returns `true` if the credential was the problem.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::UnsupportedCredential { .. }
        )
    }
}
