//! Integration tests for metric registration
//!
//! Registering the same definition twice is idempotent; conflicting
//! definitions fail at startup with `IncompatibleRedefinition`.

use rpc_prometheus::config::{BucketPreset, Buckets, InstrumentationConfig};
use rpc_prometheus::registry::{MetricDescriptor, MetricRegistry};
use rpc_prometheus::{InstrumentError, Instrumentor, LabelGranularity, Role, StatusCode};

fn assert_incompatible<T>(result: Result<T, InstrumentError>, fragment: &str) {
    match result {
        Err(InstrumentError::IncompatibleRedefinition { reason, .. }) => assert!(
            reason.contains(fragment),
            "reason {:?} should mention {:?}",
            reason,
            fragment
        ),
        Err(other) => panic!("expected IncompatibleRedefinition, got {:?}", other),
        Ok(_) => panic!("expected IncompatibleRedefinition, got Ok"),
    }
}

#[test]
fn test_two_instrumentors_with_same_config_share_series() {
    let registry = MetricRegistry::new();
    let first = Instrumentor::server(&registry).expect("first registration");
    let second = Instrumentor::server(&registry).expect("idempotent registration");

    let _: Result<(), StatusCode> = first.unary("/Svc/Foo", || Ok(()));
    let _: Result<(), StatusCode> = second.unary("/Svc/Foo", || Ok(()));

    assert_eq!(first.total("/Svc/Foo"), Some(2));
    assert_eq!(second.total("/Svc/Foo"), Some(2));
}

#[test]
fn test_different_buckets_are_incompatible() {
    let registry = MetricRegistry::new();
    Instrumentor::server(&registry).expect("fine buckets");

    let coarse =
        InstrumentationConfig::default().with_buckets(Buckets::preset(BucketPreset::Coarse));
    assert_incompatible(
        Instrumentor::new(&registry, Role::Server, &coarse),
        "parameters",
    );
}

#[test]
fn test_different_label_schema_is_incompatible() {
    let registry = MetricRegistry::new();
    Instrumentor::server(&registry).expect("service_method labels");

    let method_only =
        InstrumentationConfig::default().with_label_granularity(LabelGranularity::Method);
    assert_incompatible(
        Instrumentor::new(&registry, Role::Server, &method_only),
        "label keys",
    );
}

#[test]
fn test_kind_clash_is_incompatible() {
    let registry = MetricRegistry::new();
    registry
        .gauge(MetricDescriptor::new(
            "server_requests_total",
            "Squatting gauge",
            &["service", "method"],
        ))
        .expect("gauge registers");

    assert_incompatible(Instrumentor::server(&registry), "gauge");
}

#[test]
fn test_roles_can_share_a_registry_under_distinct_prefixes() {
    let registry = MetricRegistry::new();
    Instrumentor::server(&registry).expect("server");
    Instrumentor::client(&registry).expect("client");

    let names = registry.metric_names();
    assert_eq!(names.len(), 8);
    assert!(names.iter().any(|n| n == "client_requests_in_progress"));
    assert!(names.iter().any(|n| n == "server_requests_in_progress"));
}

#[test]
fn test_shared_prefix_with_matching_schema_is_allowed() {
    // Both roles report into one family set when given the same prefix and
    // schema; this merges their series.
    let registry = MetricRegistry::new();
    let config = InstrumentationConfig::default().with_prefix("rpc");
    let server = Instrumentor::new(&registry, Role::Server, &config).expect("server");
    let client = Instrumentor::new(&registry, Role::Client, &config).expect("client");

    let _: Result<(), StatusCode> = server.unary("/Svc/Foo", || Ok(()));
    let _: Result<(), StatusCode> = client.unary("/Svc/Foo", || Ok(()));
    assert_eq!(server.total("/Svc/Foo"), Some(2));
}

#[test]
fn test_registry_wraps_existing_prometheus_registry() {
    let prometheus = prometheus::Registry::new();
    let registry = MetricRegistry::with_registry(prometheus.clone());
    let server = Instrumentor::server(&registry).expect("server");

    let _: Result<(), StatusCode> = server.unary("/Svc/Foo", || Ok(()));

    let families = prometheus.gather();
    assert!(
        families
            .iter()
            .any(|family| family.name() == "server_requests_total")
    );
}
