//! Role-parameterized call instrumentor
//!
//! One [`Instrumentor`] per role (client or server) owns the call metric
//! families for that role. It is cheap to clone and safe to share across
//! tasks; every call opens its own [`CallScope`].

use crate::config::{CallMetric, InstrumentationConfig};
use crate::error::InstrumentResult;
use crate::method::{LabelGranularity, MethodResolver};
use crate::registry::{
    CounterFamily, GaugeFamily, HistogramFamily, MetricDescriptor, MetricRegistry,
};
use crate::scope::CallScope;
use crate::summary::{SummaryFamily, SummarySnapshot};
use std::fmt;
use std::sync::Arc;

/// Which side of the call is being measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }

    /// Metric prefix used when none is configured
    pub fn default_prefix(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Families shared by every scope of one instrumentor
pub(crate) struct CallMetrics {
    pub(crate) role: Role,
    pub(crate) prefix: String,
    pub(crate) resolver: MethodResolver,
    pub(crate) total: Option<CounterFamily>,
    pub(crate) errors: Option<CounterFamily>,
    pub(crate) in_progress: Option<GaugeFamily>,
    pub(crate) histogram: Option<HistogramFamily>,
    pub(crate) summary: Option<SummaryFamily>,
    pub(crate) unclassified_error_label: Option<String>,
}

/// Opens measurement scopes for calls of one role
#[derive(Clone)]
pub struct Instrumentor {
    metrics: Arc<CallMetrics>,
}

impl Instrumentor {
    /// Register this role's metric families in `registry`
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleRedefinition` if a family name is already
    /// registered with a different schema, or a configuration error if
    /// `config` does not validate. Both are startup-time failures.
    pub fn new(
        registry: &MetricRegistry,
        role: Role,
        config: &InstrumentationConfig,
    ) -> InstrumentResult<Self> {
        config.validate(role.as_str())?;

        let prefix = config.prefix(role).to_string();
        let granularity = config.label_granularity();
        let keys = granularity.label_keys();
        let enabled = config.enabled_metrics();
        let name = |metric: CallMetric| metric_name(&prefix, metric);

        let total = if enabled.contains(CallMetric::Total) {
            Some(registry.counter(MetricDescriptor::new(
                name(CallMetric::Total),
                format!("Total number of RPCs completed on the {}, regardless of outcome.", role),
                keys,
            ))?)
        } else {
            None
        };

        let errors = if enabled.contains(CallMetric::Error) {
            let mut error_keys = keys.to_vec();
            error_keys.push("error_code");
            Some(registry.counter(MetricDescriptor::new(
                name(CallMetric::Error),
                format!("Total number of RPCs failed on the {}, by status code.", role),
                &error_keys,
            ))?)
        } else {
            None
        };

        let in_progress = if enabled.contains(CallMetric::InProgress) {
            Some(registry.gauge(MetricDescriptor::new(
                name(CallMetric::InProgress),
                format!("Number of RPCs currently in flight on the {}.", role),
                keys,
            ))?)
        } else {
            None
        };

        let histogram = if enabled.contains(CallMetric::Histogram) {
            Some(registry.histogram(
                MetricDescriptor::new(
                    name(CallMetric::Histogram),
                    format!("Histogram of RPC duration on the {} in seconds.", role),
                    keys,
                ),
                config.buckets().values(),
            )?)
        } else {
            None
        };

        let summary = if enabled.contains(CallMetric::Summary) {
            Some(registry.summary(
                MetricDescriptor::new(
                    name(CallMetric::Summary),
                    format!("Summary of RPC duration on the {} in seconds.", role),
                    keys,
                ),
                config.summary().to_opts(),
            )?)
        } else {
            None
        };

        tracing::info!(
            role = %role,
            prefix = %prefix,
            granularity = ?granularity,
            metrics = ?enabled.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
            "Instrumentor registered"
        );

        Ok(Self {
            metrics: Arc::new(CallMetrics {
                role,
                prefix,
                resolver: MethodResolver::new(granularity),
                total,
                errors,
                in_progress,
                histogram,
                summary,
                unclassified_error_label: config.unclassified_error_label().map(str::to_string),
            }),
        })
    }

    /// Server instrumentor with default settings
    pub fn server(registry: &MetricRegistry) -> InstrumentResult<Self> {
        Self::new(registry, Role::Server, &InstrumentationConfig::default())
    }

    /// Client instrumentor with default settings
    pub fn client(registry: &MetricRegistry) -> InstrumentResult<Self> {
        Self::new(registry, Role::Client, &InstrumentationConfig::default())
    }

    pub fn role(&self) -> Role {
        self.metrics.role
    }

    pub fn granularity(&self) -> LabelGranularity {
        self.metrics.resolver.granularity()
    }

    /// Full metric name of `metric` for this instrumentor's prefix
    pub fn metric_name(&self, metric: CallMetric) -> String {
        metric_name(&self.metrics.prefix, metric)
    }

    /// Open a scope for one call
    ///
    /// Never fails: a malformed identifier degrades to fallback labels.
    pub fn open(&self, identifier: &str) -> CallScope {
        CallScope::open(Arc::clone(&self.metrics), identifier)
    }

    // Read-back helpers. Each returns `None` when the metric is disabled and
    // creates the series at zero if it does not exist yet.

    /// Current in-flight count for `identifier`
    pub fn in_progress(&self, identifier: &str) -> Option<i64> {
        let labels = self.metrics.resolver.labels(identifier);
        let family = self.metrics.in_progress.as_ref()?;
        family.child(&refs(&labels)).ok().map(|g| g.get())
    }

    /// Completed-call count for `identifier`
    pub fn total(&self, identifier: &str) -> Option<u64> {
        let labels = self.metrics.resolver.labels(identifier);
        let family = self.metrics.total.as_ref()?;
        family.child(&refs(&labels)).ok().map(|c| c.get())
    }

    /// Error count for `identifier` with `error_code`
    pub fn errors(&self, identifier: &str, error_code: &str) -> Option<u64> {
        let labels = self.metrics.resolver.labels(identifier);
        let family = self.metrics.errors.as_ref()?;
        let mut values = refs(&labels);
        values.push(error_code);
        family.child(&values).ok().map(|c| c.get())
    }

    /// `(count, sum)` of observed durations for `identifier`
    pub fn histogram(&self, identifier: &str) -> Option<(u64, f64)> {
        let labels = self.metrics.resolver.labels(identifier);
        let family = self.metrics.histogram.as_ref()?;
        family
            .child(&refs(&labels))
            .ok()
            .map(|h| (h.sample_count(), h.sample_sum()))
    }

    /// Windowed duration summary for `identifier`
    pub fn summary(&self, identifier: &str) -> Option<SummarySnapshot> {
        let labels = self.metrics.resolver.labels(identifier);
        let family = self.metrics.summary.as_ref()?;
        family.child(&refs(&labels)).ok().map(|s| s.snapshot())
    }
}

impl fmt::Debug for Instrumentor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentor")
            .field("role", &self.metrics.role)
            .field("prefix", &self.metrics.prefix)
            .field("granularity", &self.granularity())
            .finish()
    }
}

fn metric_name(prefix: &str, metric: CallMetric) -> String {
    let suffix = match metric {
        CallMetric::Total => "requests_total",
        CallMetric::Error => "requests_error_total",
        CallMetric::InProgress => "requests_in_progress",
        CallMetric::Histogram => "requests_duration_histogram_seconds",
        CallMetric::Summary => "requests_duration_summary_seconds",
    };
    format!("{}_{}", prefix, suffix)
}

fn refs(labels: &[String]) -> Vec<&str> {
    labels.iter().map(String::as_str).collect()
}
