//! Configuration file loading tests

use sigroute::config::{AggregationMode, ConfigError, RouterConfig};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_config_from_file() {
    let file = write_config(
        r#"
        [classifier]
        emergency = ["mayday", "sos"]
        policy = ["audit"]
        assist = ["support"]

        [routing]
        assist = ["Helper"]
        policy = ["Auditor"]
        emergency = ["Auditor", "Helper"]

        [routing.aggregation]
        emergency = "aggregate_all"

        [agents.endpoints]
        Helper = "http://agents.internal:9000/helper"
        Auditor = "http://agents.internal:9000/auditor"

        [dispatch]
        max_in_flight = 8
        call_timeout_ms = 1500
        request_timeout_ms = 4000

        [breaker]
        failure_threshold = 3
        cooldown_ms = 10000
        max_cooldown_ms = 60000

        [retry]
        max_attempts = 2
        base_delay_ms = 50
        max_delay_ms = 500

        [replay]
        auto = false
        interval_secs = 120
        batch_size = 10

        [health]
        port = 9090
        "#,
    );

    let config = RouterConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.classifier.emergency, vec!["mayday", "sos"]);
    assert_eq!(config.routing.emergency, vec!["Auditor", "Helper"]);
    assert_eq!(
        config.routing.aggregation.get("emergency"),
        Some(&AggregationMode::AggregateAll)
    );
    assert_eq!(config.dispatch.max_in_flight, 8);
    assert_eq!(config.breaker.failure_threshold, 3);
    assert_eq!(config.retry.max_attempts, 2);
    assert!(!config.replay.auto);
    assert_eq!(config.health.port, 9090);
}

#[test]
fn test_missing_file_is_io_error() {
    let result = RouterConfig::load_from_file("/nonexistent/sigroute.toml");
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let file = write_config("this is [not toml");
    let result = RouterConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_validation_runs_on_file_load() {
    // Routed agent without an endpoint fails even though the TOML parses
    let file = write_config(
        r#"
        [routing]
        assist = ["Phantom"]
        "#,
    );
    let result = RouterConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_roundtrips_through_toml() {
    let config = RouterConfig::default();
    let serialized = toml::to_string_pretty(&config).unwrap();
    let reloaded = RouterConfig::load_from_str(&serialized).unwrap();
    assert_eq!(config, reloaded);
}
