//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use brokerlink::config::{ClientConfig, ConfigError};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
address = "mqtt.example.org"
port = 8883
encrypted = true

[connection]
delay_ms = 100
timeout_ms = 10000
username = "device-7"
password = "correct horse"

[queue]
capacity = 512
"#
    )
    .unwrap();

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.endpoint(), "mqtt.example.org:8883");
    assert!(config.broker.encrypted);
    assert_eq!(config.connection.delay(), Duration::from_millis(100));
    assert_eq!(config.connection.timeout(), Duration::from_secs(10));
    assert_eq!(config.queue.capacity, 512);
    assert_eq!(
        config.connection.credentials(),
        (
            Some("device-7".to_string()),
            Some("correct horse".to_string())
        )
    );
}

#[test]
fn test_config_loads_with_only_broker_section() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker]\naddress = \"10.0.0.5\"\n").unwrap();

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.address, "10.0.0.5");
    assert_eq!(config.broker.port, 1883);
    assert_eq!(config.connection.delay_ms, 500);
    assert_eq!(config.connection.timeout_ms, 30_000);
    assert!(!config.connection.auto_connect);
}

#[test]
fn test_credentials_resolved_from_environment() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[connection]
username_env = "BROKERLINK_IT_USER"
password_env = "BROKERLINK_IT_PASS"
"#
    )
    .unwrap();
    unsafe {
        std::env::set_var("BROKERLINK_IT_USER", "env-user");
        std::env::set_var("BROKERLINK_IT_PASS", "env-pass");
    }

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(
        config.connection.credentials(),
        (Some("env-user".to_string()), Some("env-pass".to_string()))
    );
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ClientConfig::load_from_file(Path::new("/nonexistent/brokerlink.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker\nport = ").unwrap();

    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_wrong_type_is_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker]\nport = \"not a number\"\n").unwrap();

    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_fail_validation() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker]\naddress = \"\"\n").unwrap();

    let result = ClientConfig::load_from_file(temp_file.path());
    match result {
        Err(ConfigError::InvalidConfig(message)) => assert!(message.contains("address")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_config_round_trips_through_toml() {
    let mut config = ClientConfig::default();
    config.broker.set_port_str("1884");
    config.connection.auto_connect = true;

    let text = toml::to_string_pretty(&config).unwrap();
    let parsed = ClientConfig::from_toml_str(&text).unwrap();

    assert_eq!(parsed, config);
}
