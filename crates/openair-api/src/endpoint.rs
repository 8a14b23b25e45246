// ── Device endpoints and credentials ──
//
// Describe *where* a device lives and *how* to authenticate with it.
// Neither type touches the network.

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Default port of the native API.
pub const DEFAULT_PORT: u16 = 6053;

/// How to authenticate with the firmware.
///
/// Exactly one form is used per connection. Newer firmware only accepts
/// the pre-shared encryption key; the password form exists for older
/// firmware only.
#[derive(Debug, Clone, Default)]
pub enum Credential {
    /// Base64 pre-shared key for the encrypted framing.
    EncryptionKey(SecretString),
    /// Legacy plaintext-equivalent API password.
    Password(SecretString),
    /// No authentication configured on the device.
    #[default]
    None,
}

impl Credential {
    /// Short label used in logs and errors. Never includes the secret.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EncryptionKey(_) => "encryption key",
            Self::Password(_) => "password",
            Self::None => "no",
        }
    }
}

/// A device reachable over the native API.
#[derive(Debug, Clone)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub credential: Credential,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port,
            credential,
        }
    }

    /// Endpoint on the default port.
    pub fn with_default_port(host: impl Into<String>, credential: Credential) -> Self {
        Self::new(host, DEFAULT_PORT, credential)
    }

    /// Identity used to key per-device caches: `host:port`.
    ///
    /// The credential is deliberately not part of the identity; rotating a
    /// key does not change which firmware generation the device runs.
    pub fn identity(&self) -> EndpointIdentity {
        EndpointIdentity(format!("{}:{}", self.host.to_ascii_lowercase(), self.port))
    }
}

/// Stable identity of a [`DeviceEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointIdentity(String);

impl EndpointIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handshake metadata reported by the firmware.
///
/// Diagnostics only: generation selection never parses these strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    /// Firmware version string, e.g. `"2024.6.1"`.
    pub firmware_version: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
}
