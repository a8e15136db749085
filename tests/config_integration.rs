//! Integration tests for configuration loading

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use remotestash::config::{Config, ConfigError};

#[test]
fn test_load_partial_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
        name = "Attic RemoteStash"

        [network]
        port = 47001
        advertise = false
        "#,
    )
    .unwrap();

    let config = Config::load_config(Some(&path)).unwrap();
    assert_eq!(config.name, "Attic RemoteStash");
    assert_eq!(config.port(), Some(47001));
    assert!(!config.network.advertise);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.pinned_certificate(), config.tls.certificate.as_path());
}

#[test]
fn test_zero_port_means_ephemeral() {
    let config = Config::from_toml("[network]\nport = 0\n").unwrap();
    assert_eq!(config.port(), None);
}

#[test]
fn test_invalid_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "[server]\nmax_body_size = 10\n").unwrap();

    match Config::load_config(Some(&path)) {
        Err(ConfigError::Validation(message)) => assert!(message.contains("max_body_size")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = Config::load_config(Some(&temp_dir.path().join("absent.toml")));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_example_round_trips() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    Config::write_example(&path, false).unwrap();
    assert!(Config::write_example(&path, false).is_err());
    Config::write_example(&path, true).unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.network.resolve_timeout_secs, 5);
}
