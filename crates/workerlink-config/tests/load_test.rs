//! Layered loading: file + environment.

use serial_test::serial;
use std::io::Write;
use workerlink_config::{Config, ConfigError};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_config(
        r#"
[controller]
tick_interval_ms = 16
forward_all = true

[logging]
level = "debug"
"#,
    );
    let config = Config::load(file.path().to_str()).unwrap();
    assert_eq!(config.controller.tick_interval_ms, 16);
    assert!(config.controller.forward_all);
    assert_eq!(config.worker.tick_interval_ms, 33);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let result = Config::load(missing.to_str());
    assert!(matches!(result, Err(ConfigError::Load(_))));
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let file = write_config("[worker]\ntick_interval_ms = 50\n");
    std::env::set_var("WORKERLINK_WORKER__TICK_INTERVAL_MS", "20");
    std::env::set_var("WORKERLINK_WORKER__FORWARD_ALL", "true");
    let result = Config::load(file.path().to_str());
    std::env::remove_var("WORKERLINK_WORKER__TICK_INTERVAL_MS");
    std::env::remove_var("WORKERLINK_WORKER__FORWARD_ALL");

    let config = result.unwrap();
    assert_eq!(config.worker.tick_interval_ms, 20);
    assert!(config.worker.forward_all);
}

#[test]
#[serial]
fn test_invalid_file_values_rejected() {
    let file = write_config("[controller]\ntick_interval_ms = 0\n");
    let result = Config::load(file.path().to_str());
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
#[serial]
fn test_write_default_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    Config::write_default(&path, false).unwrap();
    assert!(path.exists());

    let loaded = Config::load(path.to_str()).unwrap();
    assert_eq!(loaded, Config::default());

    // A second write without force must not clobber the file.
    let again = Config::write_default(&path, false);
    assert!(matches!(again, Err(ConfigError::Invalid(_))));
    assert!(Config::write_default(&path, true).is_ok());
}

#[test]
fn test_config_serializes_to_json() {
    let json = serde_json::to_value(Config::default()).unwrap();
    assert_eq!(json["controller"]["tick_interval_ms"], 33);
    assert_eq!(json["logging"]["level"], "info");
}
