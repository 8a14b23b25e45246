#![allow(clippy::unwrap_used)]

use std::time::Duration;

use pretty_assertions::assert_eq;

use openair_api::Credential;
use openair_config::{
    Config, ConfigError, DeviceProfile, load_config_from, resolve_device_with, save_config_to,
};

const SAMPLE: &str = r#"
default_device = "living"

[defaults]
settle_delay_ms = 750

[defaults.reconnect]
max_attempts = 4

[devices.living]
host = "open-air-mini.local"
encryption_key_env = "LIVING_KEY"

[devices.attic]
host = "10.0.0.9"
port = 6054
password = "hunter2"
debounce_ms = 250
"#;

#[test]
fn loads_profiles_and_partial_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let cfg = load_config_from(&path).unwrap();
    assert_eq!(cfg.default_device.as_deref(), Some("living"));
    assert_eq!(cfg.defaults.settle_delay_ms, 750);
    assert_eq!(cfg.defaults.connect_timeout_ms, 10_000);
    assert_eq!(cfg.defaults.reconnect.max_attempts, 4);
    assert_eq!(
        cfg.defaults.reconnect.initial_delay,
        Duration::from_secs(5)
    );
    assert_eq!(cfg.devices.len(), 2);
    assert_eq!(cfg.devices["living"].port, 6053);
}

#[test]
fn resolves_sessions_from_loaded_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();
    let cfg = load_config_from(&path).unwrap();

    let living = resolve_device_with(&cfg, "living", |var| {
        (var == "LIVING_KEY").then(|| "bGl2aW5nLWtleQ==".to_string())
    })
    .unwrap();
    assert!(matches!(
        living.endpoint.credential,
        Credential::EncryptionKey(_)
    ));
    assert_eq!(living.settle_delay, Duration::from_millis(750));
    assert_eq!(living.reconnect.max_attempts, 4);

    let attic = resolve_device_with(&cfg, "attic", |_| None).unwrap();
    assert!(matches!(attic.endpoint.credential, Credential::Password(_)));
    assert_eq!(attic.endpoint.identity().as_str(), "10.0.0.9:6054");
    assert_eq!(attic.debounce_window, Duration::from_millis(250));

    let missing = resolve_device_with(&cfg, "living", |_| None);
    assert!(matches!(missing, Err(ConfigError::MissingSecret { .. })));
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
    assert!(cfg.devices.is_empty());
    assert_eq!(cfg.defaults.debounce_ms, 100);
}

#[test]
fn malformed_file_is_a_figment_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[devices.living]\nport = \"not a port\"\n").unwrap();
    assert!(matches!(
        load_config_from(&path),
        Err(ConfigError::Figment(_))
    ));
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut cfg = Config::default();
    cfg.devices.insert(
        "bedroom".into(),
        DeviceProfile {
            settle_delay_ms: Some(300),
            ..DeviceProfile::new("10.0.0.8")
        },
    );
    save_config_to(&cfg, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    let bedroom = &loaded.devices["bedroom"];
    assert_eq!(bedroom.host, "10.0.0.8");
    assert_eq!(bedroom.settle_delay_ms, Some(300));
    assert_eq!(loaded.defaults, cfg.defaults);
}
