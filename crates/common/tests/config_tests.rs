//! Integration tests for configuration parsing

use common::DriverConfig;
use wire::SampleFormat;

const MINIMAL_CONFIG: &str = r#"
log_level = "info"

[stream]

[usb]
filters = []
"#;

const FULL_CONFIG: &str = r#"
log_level = "debug"

[stream]
num_buffers = 32
buffer_size = 4096
num_transfers = 16
timeout_ms = 1000
format = "sc16q11meta"

[usb]
filters = ["0x2cf0:0x5246", "0x2cf0:*"]
"#;

#[test]
fn minimal_config_uses_stream_defaults() {
    let config: DriverConfig = toml::from_str(MINIMAL_CONFIG).unwrap();
    config.validate().unwrap();

    assert_eq!(config.stream.num_buffers, 16);
    assert_eq!(config.stream.buffer_size, 8192);
    assert_eq!(config.stream.num_transfers, 8);
    assert_eq!(config.stream.timeout_ms, 3500);
    assert_eq!(config.stream.format, SampleFormat::Sc16Q11);
}

#[test]
fn full_config_parses_every_field() {
    let config: DriverConfig = toml::from_str(FULL_CONFIG).unwrap();
    config.validate().unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.stream.num_buffers, 32);
    assert_eq!(config.stream.buffer_size, 4096);
    assert_eq!(config.stream.num_transfers, 16);
    assert_eq!(config.stream.timeout_ms, 1000);
    assert_eq!(config.stream.format, SampleFormat::Sc16Q11Meta);
    assert_eq!(config.usb.filters.len(), 2);
}

#[test]
fn empty_config_is_all_defaults() {
    let config: DriverConfig = toml::from_str("").unwrap();
    config.validate().unwrap();
    assert_eq!(config.log_level, "info");
}

#[test]
fn invalid_geometry_fails_validation() {
    let config: DriverConfig = toml::from_str(
        r#"
[stream]
num_buffers = 4
num_transfers = 8
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn unknown_format_is_rejected_at_parse_time() {
    let result: Result<DriverConfig, _> = toml::from_str(
        r#"
[stream]
format = "sc8q7"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn save_and_reload_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = DriverConfig::default();
    config.stream.buffer_size = 2048;
    config.usb.filters = vec!["0x2cf0:*".to_string()];
    config.save(&path).unwrap();

    let loaded = DriverConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.stream.buffer_size, 2048);
    assert_eq!(loaded.usb.filters, vec!["0x2cf0:*".to_string()]);
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.toml");
    assert!(DriverConfig::load(Some(path)).is_err());
}
