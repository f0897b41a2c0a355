//! Integration tests for configuration loading and validation
//!
//! Verifies that invalid configurations are rejected at startup
//! (Config::from_file()) with the failing phase preserved in the error: file
//! read, TOML parse, or validation.

use rpc_prometheus::config::{COARSE_BUCKETS, CallMetric, Config};
use rpc_prometheus::{InstrumentError, Instrumentor, LabelGranularity, MetricRegistry, Role};
use std::error::Error as _;
use std::io::Write;
use tempfile::NamedTempFile;

/// Helper to create a temporary config file with given TOML content
fn create_temp_config(toml_content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file
        .write_all(toml_content.as_bytes())
        .expect("Failed to write temp file");
    temp_file.flush().expect("Failed to flush temp file");
    temp_file
}

#[test]
fn test_full_config_loads_and_drives_instrumentors() {
    let file = create_temp_config(
        r#"
[server]
prefix = "grpc_server"
label_granularity = "method"
enabled_metrics = ["total", "error", "in_progress", "histogram", "summary"]
buckets = "coarse"
unclassified_error_label = "Unknown"

[server.summary]
quantiles = [0.5, 0.99]
max_age_seconds = 120
age_buckets = 4

[client]
buckets = [0.001, 0.01, 0.1]

[observability]
log_level = "debug"
"#,
    );

    let config = Config::from_file(file.path()).expect("valid config should load");
    assert_eq!(config.server.prefix(Role::Server), "grpc_server");
    assert_eq!(config.server.label_granularity(), LabelGranularity::Method);
    assert!(config.server.enabled_metrics().contains(CallMetric::Summary));
    assert_eq!(config.server.buckets().values(), &COARSE_BUCKETS);
    assert_eq!(config.client.prefix(Role::Client), "client");
    assert_eq!(config.client.buckets().values(), &[0.001, 0.01, 0.1]);
    assert_eq!(config.observability.log_level, "debug");

    let registry = MetricRegistry::new();
    let server = Instrumentor::new(&registry, Role::Server, config.for_role(Role::Server))
        .expect("server registers");
    Instrumentor::new(&registry, Role::Client, config.for_role(Role::Client))
        .expect("client registers");
    assert_eq!(
        server.metric_name(CallMetric::Histogram),
        "grpc_server_requests_duration_histogram_seconds"
    );
    assert_eq!(registry.metric_names().len(), 9);
}

#[test]
fn test_missing_file_reports_read_phase() {
    let err = Config::from_file("/nonexistent/rpc-prometheus/config.toml")
        .expect_err("missing file must fail");
    assert!(
        matches!(err, InstrumentError::ConfigFileRead { .. }),
        "got {:?}",
        err
    );
    assert!(err.source().is_some(), "io::Error should be preserved");
}

#[test]
fn test_malformed_toml_reports_parse_phase() {
    let file = create_temp_config("[server\nprefix = ");
    let err = Config::from_file(file.path()).expect_err("bad TOML must fail");
    assert!(matches!(err, InstrumentError::ConfigParseFailed { .. }));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn test_non_increasing_buckets_rejected_during_parse() {
    let file = create_temp_config(
        r#"
[client]
buckets = [1.0, 0.5]
"#,
    );
    let err = Config::from_file(file.path()).expect_err("descending buckets");
    assert!(matches!(err, InstrumentError::ConfigParseFailed { .. }));
}

#[test]
fn test_unknown_bucket_preset_rejected() {
    let file = create_temp_config(
        r#"
[server]
buckets = "medium"
"#,
    );
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_out_of_range_quantile_rejected() {
    let file = create_temp_config(
        r#"
[server.summary]
quantiles = [0.5, 1.5]
"#,
    );
    let err = Config::from_file(file.path()).expect_err("quantile above 1");
    assert!(matches!(err, InstrumentError::ConfigParseFailed { .. }));
}

#[test]
fn test_invalid_prefix_reports_validation_phase() {
    let file = create_temp_config(
        r#"
[client]
prefix = "my-client"
"#,
    );
    let err = Config::from_file(file.path()).expect_err("dash in prefix");
    match err {
        InstrumentError::ConfigValidationFailed { reason, .. } => {
            assert!(reason.contains("client.prefix"), "reason: {}", reason);
        }
        other => panic!("expected ConfigValidationFailed, got {:?}", other),
    }
}

#[test]
fn test_empty_enabled_metrics_rejected() {
    let file = create_temp_config(
        r#"
[server]
enabled_metrics = []
"#,
    );
    let err = Config::from_file(file.path()).expect_err("no metrics enabled");
    assert!(matches!(err, InstrumentError::ConfigValidationFailed { .. }));
}

#[test]
fn test_zero_age_buckets_rejected() {
    let file = create_temp_config(
        r#"
[server.summary]
age_buckets = 0
"#,
    );
    let err = Config::from_file(file.path()).expect_err("zero age buckets");
    assert!(matches!(err, InstrumentError::ConfigValidationFailed { .. }));
}

#[test]
fn test_empty_file_yields_defaults() {
    let file = create_temp_config("");
    let config = Config::from_file(file.path()).expect("empty config is valid");
    assert_eq!(config.server.prefix(Role::Server), "server");
    assert_eq!(
        config.server.label_granularity(),
        LabelGranularity::ServiceMethod
    );
    assert_eq!(config.observability.log_level, "info");
}
