//! Device profiles for Open AIR sessions.
//!
//! TOML profiles, credential resolution (env var or plaintext), and
//! translation to `openair_core::SessionConfig`. The core crate never reads
//! files; hosts that keep their own settings store can skip this crate and
//! build a `SessionConfig` directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use openair_api::{Credential, DEFAULT_PORT, DeviceEndpoint};
use openair_core::{ReconnectConfig, SessionConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no device named '{device}' in config")]
    UnknownDevice { device: String },

    #[error("device '{device}' reads its {secret} from ${var}, which is not set")]
    MissingSecret {
        device: String,
        secret: &'static str,
        var: String,
    },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Device used when the host does not name one.
    pub default_device: Option<String>,

    /// Timing applied to every device unless its profile overrides it.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub devices: HashMap<String, DeviceProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            debounce_ms: default_debounce_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
fn default_connect_timeout_ms() -> u64 {
    millis(openair_core::config::DEFAULT_CONNECT_TIMEOUT)
}
fn default_settle_delay_ms() -> u64 {
    millis(openair_core::config::DEFAULT_SETTLE_DELAY)
}
fn default_debounce_ms() -> u64 {
    millis(openair_core::config::DEFAULT_DEBOUNCE_WINDOW)
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

/// One device on the network.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceProfile {
    /// Hostname or IP address, e.g. `"open-air-mini.local"`.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base64 pre-shared key (plaintext; prefer `encryption_key_env`).
    pub encryption_key: Option<String>,

    /// Environment variable holding the encryption key.
    pub encryption_key_env: Option<String>,

    /// API password for older firmware (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable holding the API password.
    pub password_env: Option<String>,

    pub connect_timeout_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub reconnect: Option<ReconnectConfig>,
}

impl DeviceProfile {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            ..Self::default()
        }
    }

    fn has_key(&self) -> bool {
        self.encryption_key.is_some() || self.encryption_key_env.is_some()
    }

    fn has_password(&self) -> bool {
        self.password.is_some() || self.password_env.is_some()
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "openair", "openair").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("openair");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` merged with `OPENAIR_*` environment.
///
/// Nested keys use a double underscore, e.g.
/// `OPENAIR_DEVICES__BEDROOM__HOST=10.0.0.7`. A missing file is not an
/// error; the defaults apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("OPENAIR_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the credential a profile describes.
///
/// Encryption key first, then password; within each, the env var wins over
/// plaintext. A profile configuring neither connects without auth. `lookup`
/// reads an environment variable; [`resolve_device`] passes the process
/// environment.
pub fn resolve_credential(
    profile: &DeviceProfile,
    device: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credential, ConfigError> {
    if profile.has_key() {
        let secret = resolve_secret(
            profile.encryption_key_env.as_deref(),
            profile.encryption_key.as_deref(),
            device,
            "encryption key",
            &lookup,
        )?;
        return Ok(Credential::EncryptionKey(secret));
    }

    if profile.has_password() {
        let secret = resolve_secret(
            profile.password_env.as_deref(),
            profile.password.as_deref(),
            device,
            "password",
            &lookup,
        )?;
        return Ok(Credential::Password(secret));
    }

    Ok(Credential::None)
}

fn resolve_secret(
    env_name: Option<&str>,
    plaintext: Option<&str>,
    device: &str,
    secret: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Env var named by the profile
    if let Some(var) = env_name {
        if let Some(val) = lookup(var).filter(|v| !v.is_empty()) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. Plaintext in config
    if let Some(val) = plaintext {
        return Ok(SecretString::from(val.to_owned()));
    }

    Err(ConfigError::MissingSecret {
        device: device.into(),
        secret,
        var: env_name.unwrap_or_default().into(),
    })
}

// ── Session translation ─────────────────────────────────────────────

fn validate(profile: &DeviceProfile) -> Result<(), ConfigError> {
    if profile.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    if profile.port == 0 {
        return Err(ConfigError::Validation {
            field: "port".into(),
            reason: "must be between 1 and 65535".into(),
        });
    }
    if profile.has_key() && profile.has_password() {
        return Err(ConfigError::Validation {
            field: "encryption_key".into(),
            reason: "configure either an encryption key or a password, not both".into(),
        });
    }
    Ok(())
}

/// Build a `SessionConfig` from a profile, falling back to `defaults` for
/// any timing the profile leaves unset.
pub fn profile_to_session_config(
    profile: &DeviceProfile,
    device: &str,
    defaults: &Defaults,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SessionConfig, ConfigError> {
    validate(profile)?;
    let credential = resolve_credential(profile, device, lookup)?;
    let endpoint = DeviceEndpoint::new(profile.host.trim(), profile.port, credential);

    let mut session = SessionConfig::new(endpoint);
    session.connect_timeout = Duration::from_millis(
        profile
            .connect_timeout_ms
            .unwrap_or(defaults.connect_timeout_ms),
    );
    session.settle_delay =
        Duration::from_millis(profile.settle_delay_ms.unwrap_or(defaults.settle_delay_ms));
    session.debounce_window =
        Duration::from_millis(profile.debounce_ms.unwrap_or(defaults.debounce_ms));
    session.reconnect = profile
        .reconnect
        .clone()
        .unwrap_or_else(|| defaults.reconnect.clone());
    Ok(session)
}

/// Resolve a named device against the process environment.
pub fn resolve_device(cfg: &Config, device: &str) -> Result<SessionConfig, ConfigError> {
    resolve_device_with(cfg, device, |var| std::env::var(var).ok())
}

pub fn resolve_device_with(
    cfg: &Config,
    device: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SessionConfig, ConfigError> {
    let profile = cfg
        .devices
        .get(device)
        .ok_or_else(|| ConfigError::UnknownDevice {
            device: device.into(),
        })?;
    profile_to_session_config(profile, device, &cfg.defaults, lookup)
}

/// Name of the device to use when the host does not pick one: the
/// configured default, or the only profile if there is exactly one.
pub fn default_device(cfg: &Config) -> Option<&str> {
    if let Some(name) = cfg.default_device.as_deref() {
        return Some(name);
    }
    let mut names = cfg.devices.keys();
    match (names.next(), names.next()) {
        (Some(only), None) => Some(only.as_str()),
        _ => None,
    }
}
