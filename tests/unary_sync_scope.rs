//! Integration tests for synchronous unary calls
//!
//! Verifies the scope lifecycle end to end: total, error and in-flight
//! metrics for success, classified failure, unclassified failure and panics.

use rpc_prometheus::config::{EnabledMetrics, InstrumentationConfig};
use rpc_prometheus::{Classify, Instrumentor, MetricRegistry, Outcome, Role, StatusCode};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

/// Application error raised by the handlers under test
#[derive(Debug, PartialEq)]
enum RpcError {
    Status(StatusCode),
    Opaque(String),
}

impl Classify for RpcError {
    fn status_code(&self) -> Option<StatusCode> {
        match self {
            RpcError::Status(code) => Some(*code),
            RpcError::Opaque(_) => None,
        }
    }
}

fn server_with(config: InstrumentationConfig) -> (MetricRegistry, Instrumentor) {
    let registry = MetricRegistry::new();
    let server =
        Instrumentor::new(&registry, Role::Server, &config).expect("should register metrics");
    (registry, server)
}

#[test]
fn test_successful_call_counts_once_without_errors() {
    let (registry, server) = server_with(InstrumentationConfig::default());

    let reply: Result<&str, RpcError> = server.unary("/Svc/Foo", || Ok("hello"));
    assert_eq!(reply, Ok("hello"));

    assert_eq!(server.total("/Svc/Foo"), Some(1));
    assert_eq!(server.in_progress("/Svc/Foo"), Some(0));
    let (count, sum) = server.histogram("/Svc/Foo").expect("histogram enabled");
    assert_eq!(count, 1);
    assert!(sum >= 0.0);

    let text = registry.gather().expect("gather");
    assert!(text.contains(r#"server_requests_total{method="Foo",service="Svc"} 1"#));
    assert!(
        !text.contains("server_requests_error_total{"),
        "no error series should exist after a success:\n{}",
        text
    );
}

/// `(le, cumulative count)` pairs of one histogram series in exposition text
fn histogram_buckets(text: &str, name: &str) -> Vec<(f64, u64)> {
    let prefix = format!("{}_bucket{{", name);
    text.lines()
        .filter(|line| line.starts_with(&prefix))
        .filter_map(|line| {
            let le = line.split(r#"le=""#).nth(1)?.split('"').next()?;
            let count = line.rsplit(' ').next()?.parse().ok()?;
            let le = if le == "+Inf" {
                f64::INFINITY
            } else {
                le.parse().ok()?
            };
            Some((le, count))
        })
        .collect()
}

#[test]
fn test_slow_call_lands_in_bucket_at_or_above_its_duration() {
    let (registry, server) = server_with(InstrumentationConfig::default());

    let reply: Result<&str, RpcError> = server.unary("/helloworld.Greeter/SayHello", || {
        thread::sleep(Duration::from_millis(50));
        Ok("hello")
    });
    assert_eq!(reply, Ok("hello"));

    let text = registry.gather().expect("gather");
    assert!(text.contains(
        r#"server_requests_total{method="SayHello",service="helloworld.Greeter"} 1"#
    ));
    assert!(text.contains(
        r#"server_requests_in_progress{method="SayHello",service="helloworld.Greeter"} 0"#
    ));

    let buckets = histogram_buckets(&text, "server_requests_duration_histogram_seconds");
    assert!(!buckets.is_empty(), "no bucket lines in:\n{}", text);

    let count_at = |bound: f64| {
        buckets
            .iter()
            .find(|(le, _)| *le == bound)
            .map(|(_, count)| *count)
    };
    assert_eq!(count_at(0.025), Some(0));
    assert_eq!(count_at(f64::INFINITY), Some(1));

    // Every bucket below 50ms is empty, so the first non-empty one is at or above it
    let first_hit = buckets
        .iter()
        .find(|(_, count)| *count == 1)
        .map(|(le, _)| *le)
        .expect("the call must land in some bucket");
    assert!(first_hit >= 0.05, "first non-empty bucket le={}", first_hit);
    assert!(buckets.iter().all(|(le, count)| *le >= 0.05 || *count == 0));
}

#[test]
fn test_classified_failure_increments_error_with_exact_code() {
    let (registry, server) = server_with(InstrumentationConfig::default());

    let reply: Result<(), RpcError> =
        server.unary("/Svc/Foo", || Err(RpcError::Status(StatusCode::NotFound)));
    assert_eq!(reply, Err(RpcError::Status(StatusCode::NotFound)));

    assert_eq!(server.total("/Svc/Foo"), Some(1));
    assert_eq!(server.in_progress("/Svc/Foo"), Some(0));

    let text = registry.gather().expect("gather");
    assert!(text.contains(
        r#"server_requests_error_total{error_code="NotFound",method="Foo",service="Svc"} 1"#
    ));
}

#[test]
fn test_unclassified_failure_leaves_error_counter_alone() {
    let (registry, server) = server_with(InstrumentationConfig::default());

    let reply: Result<(), RpcError> =
        server.unary("/Svc/Foo", || Err(RpcError::Opaque("boom".to_string())));
    assert!(reply.is_err());

    assert_eq!(server.total("/Svc/Foo"), Some(1));
    assert_eq!(server.in_progress("/Svc/Foo"), Some(0));
    let text = registry.gather().expect("gather");
    assert!(!text.contains("server_requests_error_total{"));
}

#[test]
fn test_unclassified_failure_uses_configured_label() {
    let (_registry, server) = server_with(
        InstrumentationConfig::default().with_unclassified_error_label("Unclassified"),
    );

    let _: Result<(), RpcError> =
        server.unary("/Svc/Foo", || Err(RpcError::Opaque("boom".to_string())));

    assert_eq!(server.errors("/Svc/Foo", "Unclassified"), Some(1));
}

#[test]
fn test_panic_is_recorded_as_unclassified_and_propagates() {
    let (_registry, server) = server_with(
        InstrumentationConfig::default().with_unclassified_error_label("Unknown"),
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let _: Result<(), RpcError> = server.unary("/Svc/Foo", || panic!("handler bug"));
    }));
    assert!(outcome.is_err(), "panic must propagate to the caller");

    assert_eq!(server.total("/Svc/Foo"), Some(1));
    assert_eq!(server.in_progress("/Svc/Foo"), Some(0));
    assert_eq!(server.errors("/Svc/Foo", "Unknown"), Some(1));
}

#[test]
fn test_gauge_nets_to_zero_for_every_outcome() {
    let (_registry, server) = server_with(InstrumentationConfig::default());

    for (idx, outcome) in [
        Outcome::Succeeded,
        Outcome::ClassifiedFailed(StatusCode::Internal),
        Outcome::UnclassifiedFailed,
        Outcome::Cancelled,
    ]
    .into_iter()
    .enumerate()
    {
        let mut scope = server.open("/Svc/Foo");
        assert_eq!(server.in_progress("/Svc/Foo"), Some(1));
        let report = scope.close(outcome);
        assert_eq!(report.outcome, outcome);
        assert_eq!(server.in_progress("/Svc/Foo"), Some(0));
        assert_eq!(server.total("/Svc/Foo"), Some(idx as u64 + 1));
    }
}

#[test]
fn test_method_granularity_labels_only_method() {
    let (registry, server) = server_with(
        InstrumentationConfig::default()
            .with_label_granularity(rpc_prometheus::LabelGranularity::Method),
    );

    let _: Result<(), RpcError> = server.unary("/a.Svc/Foo", || Ok(()));
    let _: Result<(), RpcError> = server.unary("/b.Other/Foo", || Ok(()));

    // Same-named methods of different services share one series
    assert_eq!(server.total("/a.Svc/Foo"), Some(2));
    let text = registry.gather().expect("gather");
    assert!(text.contains(r#"server_requests_total{method="Foo"} 2"#));
}

#[test]
fn test_malformed_identifier_degrades_labels_and_call_proceeds() {
    let (registry, server) = server_with(InstrumentationConfig::default());

    let reply: Result<u8, RpcError> = server.unary("not-a-path", || Ok(42));
    assert_eq!(reply, Ok(42));

    let text = registry.gather().expect("gather");
    assert!(text.contains(r#"server_requests_total{method="not-a-path",service=""} 1"#));
}

#[test]
fn test_summary_observes_durations_when_enabled() {
    let (registry, server) = server_with(
        InstrumentationConfig::default().with_enabled_metrics(EnabledMetrics::all()),
    );

    for _ in 0..10 {
        let _: Result<(), RpcError> = server.unary("/Svc/Foo", || Ok(()));
    }

    let snapshot = server.summary("/Svc/Foo").expect("summary enabled");
    assert_eq!(snapshot.count, 10);
    assert_eq!(snapshot.quantiles.len(), 3);
    assert!(snapshot.quantiles.iter().all(|(_, value)| *value >= 0.0));

    let text = registry.gather().expect("gather");
    assert!(text.contains("# TYPE server_requests_duration_summary_seconds summary"));
    assert!(text.contains(r#"quantile="0.99""#));
}
