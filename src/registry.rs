//! Metric registry for call instrumentation
//!
//! Wraps a [`prometheus::Registry`] with idempotent, schema-checked
//! registration:
//! - Registering the same definition twice returns a handle to the same family
//! - Registering a name with a different kind, label keys, buckets or summary
//!   window fails with `IncompatibleRedefinition` (a startup-time error)
//!
//! Families create one child per label tuple lazily. Child creation is an
//! atomic get-or-create inside the family, so concurrent first use of a label
//! tuple never produces duplicates or loses updates.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::error::{InstrumentError, InstrumentResult};
use crate::summary::{SummaryChild, SummaryFamily, SummaryOpts};

/// Name, help text and label schema of a metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    name: String,
    help: String,
    label_keys: Vec<String>,
}

impl MetricDescriptor {
    pub fn new(name: impl Into<String>, help: impl Into<String>, label_keys: &[&str]) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_keys: label_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    fn label_key_refs(&self) -> Vec<&str> {
        self.label_keys.iter().map(String::as_str).collect()
    }
}

/// Metric kind, including the parameters that are part of its identity
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram { buckets: Vec<f64> },
    Summary(SummaryOpts),
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram { .. } => "histogram",
            MetricKind::Summary(_) => "summary",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stopwatch handed out by histogram and summary children
///
/// `stop()` is idempotent: the first call fixes the measurement and every
/// later call returns it unchanged.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
    stopped: Option<f64>,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            stopped: None,
        }
    }

    /// Stop the timer and return elapsed seconds
    pub fn stop(&mut self) -> f64 {
        *self
            .stopped
            .get_or_insert_with(|| self.start.elapsed().as_secs_f64())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }
}

/// Counter child for one label tuple
#[derive(Clone)]
pub struct CounterChild(prometheus::IntCounter);

impl CounterChild {
    pub fn increment(&self) {
        self.0.inc();
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

/// Gauge child for one label tuple
#[derive(Clone)]
pub struct GaugeChild(prometheus::IntGauge);

impl GaugeChild {
    pub fn increment(&self) {
        self.0.inc();
    }

    pub fn decrement(&self) {
        self.0.dec();
    }

    pub fn get(&self) -> i64 {
        self.0.get()
    }
}

/// Histogram child for one label tuple
#[derive(Clone)]
pub struct HistogramChild(prometheus::Histogram);

impl HistogramChild {
    pub fn observe(&self, seconds: f64) {
        self.0.observe(seconds);
    }

    pub fn start_timer(&self) -> Timer {
        Timer::start()
    }

    pub fn sample_count(&self) -> u64 {
        self.0.get_sample_count()
    }

    pub fn sample_sum(&self) -> f64 {
        self.0.get_sample_sum()
    }
}

/// Labeled counter family
#[derive(Clone, Debug)]
pub struct CounterFamily(IntCounterVec);

impl CounterFamily {
    /// # Errors
    ///
    /// Returns an error if `values` does not match the family's label keys.
    pub fn child(&self, values: &[&str]) -> InstrumentResult<CounterChild> {
        Ok(CounterChild(self.0.get_metric_with_label_values(values)?))
    }
}

/// Labeled gauge family
#[derive(Clone, Debug)]
pub struct GaugeFamily(IntGaugeVec);

impl GaugeFamily {
    /// # Errors
    ///
    /// Returns an error if `values` does not match the family's label keys.
    pub fn child(&self, values: &[&str]) -> InstrumentResult<GaugeChild> {
        Ok(GaugeChild(self.0.get_metric_with_label_values(values)?))
    }
}

/// Labeled histogram family
#[derive(Clone, Debug)]
pub struct HistogramFamily(HistogramVec);

impl HistogramFamily {
    /// # Errors
    ///
    /// Returns an error if `values` does not match the family's label keys.
    pub fn child(&self, values: &[&str]) -> InstrumentResult<HistogramChild> {
        Ok(HistogramChild(self.0.get_metric_with_label_values(values)?))
    }
}

impl SummaryFamily {
    /// # Errors
    ///
    /// Returns an error if `values` does not match the family's label keys.
    pub fn child(&self, values: &[&str]) -> InstrumentResult<SummaryChild> {
        Ok(self.get_metric_with_label_values(values)?)
    }
}

#[derive(Clone)]
enum Family {
    Counter(CounterFamily),
    Gauge(GaugeFamily),
    Histogram(HistogramFamily),
    Summary(SummaryFamily),
}

impl Family {
    fn kind_str(&self) -> &'static str {
        match self {
            Family::Counter(_) => "counter",
            Family::Gauge(_) => "gauge",
            Family::Histogram(_) => "histogram",
            Family::Summary(_) => "summary",
        }
    }

    fn mismatch(&self, name: String, requested: &str) -> InstrumentError {
        InstrumentError::IncompatibleRedefinition {
            name,
            reason: format!("registered as {}, requested as {}", self.kind_str(), requested),
        }
    }
}

struct Registered {
    descriptor: MetricDescriptor,
    kind: MetricKind,
    family: Family,
}

impl Registered {
    /// Explain why `kind`/`descriptor` cannot share this registration
    fn conflict(&self, descriptor: &MetricDescriptor, kind: &MetricKind) -> Option<String> {
        if self.kind.as_str() != kind.as_str() {
            return Some(format!(
                "registered as {}, requested as {}",
                self.kind, kind
            ));
        }
        if self.descriptor.label_keys != descriptor.label_keys {
            return Some(format!(
                "registered with label keys {:?}, requested with {:?}",
                self.descriptor.label_keys, descriptor.label_keys
            ));
        }
        if self.kind != *kind {
            return Some(format!(
                "registered {} parameters {:?} differ from requested {:?}",
                kind, self.kind, kind
            ));
        }
        None
    }
}

/// Registry of call metrics
///
/// Cheap to clone; clones share the underlying prometheus registry and the
/// registration table. Pass it explicitly to every instrumentor that should
/// report into it.
#[derive(Clone)]
pub struct MetricRegistry {
    registry: Registry,
    registered: Arc<Mutex<HashMap<String, Registered>>>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("MetricRegistry")
            .field("metrics", &names)
            .finish()
    }
}

impl MetricRegistry {
    /// Create a registry backed by a fresh prometheus registry
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Create a registry reporting into an existing prometheus registry
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            registered: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The underlying prometheus registry, for wiring into an exporter
    pub fn prometheus(&self) -> &Registry {
        &self.registry
    }

    /// Register (or look up) a counter family
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleRedefinition` if the name is taken by a different
    /// definition, or a prometheus error if the name is invalid.
    pub fn counter(&self, descriptor: MetricDescriptor) -> InstrumentResult<CounterFamily> {
        let name = descriptor.name().to_string();
        match self.register(descriptor, MetricKind::Counter)? {
            Family::Counter(family) => Ok(family),
            other => Err(other.mismatch(name, "counter")),
        }
    }

    /// Register (or look up) a gauge family
    ///
    /// # Errors
    ///
    /// See [`counter`](Self::counter).
    pub fn gauge(&self, descriptor: MetricDescriptor) -> InstrumentResult<GaugeFamily> {
        let name = descriptor.name().to_string();
        match self.register(descriptor, MetricKind::Gauge)? {
            Family::Gauge(family) => Ok(family),
            other => Err(other.mismatch(name, "gauge")),
        }
    }

    /// Register (or look up) a histogram family with the given buckets
    ///
    /// # Errors
    ///
    /// See [`counter`](Self::counter). Prometheus also rejects bucket lists
    /// that are not strictly increasing.
    pub fn histogram(
        &self,
        descriptor: MetricDescriptor,
        buckets: &[f64],
    ) -> InstrumentResult<HistogramFamily> {
        let kind = MetricKind::Histogram {
            buckets: buckets.to_vec(),
        };
        let name = descriptor.name().to_string();
        match self.register(descriptor, kind)? {
            Family::Histogram(family) => Ok(family),
            other => Err(other.mismatch(name, "histogram")),
        }
    }

    /// Register (or look up) a windowed summary family
    ///
    /// # Errors
    ///
    /// See [`counter`](Self::counter).
    pub fn summary(
        &self,
        descriptor: MetricDescriptor,
        opts: SummaryOpts,
    ) -> InstrumentResult<SummaryFamily> {
        let name = descriptor.name().to_string();
        match self.register(descriptor, MetricKind::Summary(opts))? {
            Family::Summary(family) => Ok(family),
            other => Err(other.mismatch(name, "summary")),
        }
    }

    fn register(&self, descriptor: MetricDescriptor, kind: MetricKind) -> InstrumentResult<Family> {
        // Registration happens at startup; holding the table lock while the
        // prometheus registry is updated keeps check-then-insert atomic.
        let mut registered = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = registered.get(descriptor.name()) {
            if let Some(reason) = existing.conflict(&descriptor, &kind) {
                tracing::error!(
                    metric = %descriptor.name(),
                    reason = %reason,
                    "Incompatible metric redefinition"
                );
                return Err(InstrumentError::IncompatibleRedefinition {
                    name: descriptor.name().to_string(),
                    reason,
                });
            }
            if existing.descriptor.help() != descriptor.help() {
                tracing::warn!(
                    metric = %descriptor.name(),
                    registered_help = %existing.descriptor.help(),
                    requested_help = %descriptor.help(),
                    "Reusing metric registered with different help text"
                );
            }
            tracing::debug!(metric = %descriptor.name(), kind = %kind, "Reusing registered metric");
            return Ok(existing.family.clone());
        }

        let keys = descriptor.label_key_refs();
        let family = match &kind {
            MetricKind::Counter => {
                let vec = IntCounterVec::new(Opts::new(descriptor.name(), descriptor.help()), &keys)?;
                self.registry.register(Box::new(vec.clone()))?;
                Family::Counter(CounterFamily(vec))
            }
            MetricKind::Gauge => {
                let vec = IntGaugeVec::new(Opts::new(descriptor.name(), descriptor.help()), &keys)?;
                self.registry.register(Box::new(vec.clone()))?;
                Family::Gauge(GaugeFamily(vec))
            }
            MetricKind::Histogram { buckets } => {
                let vec = HistogramVec::new(
                    HistogramOpts::new(descriptor.name(), descriptor.help()).buckets(buckets.clone()),
                    &keys,
                )?;
                self.registry.register(Box::new(vec.clone()))?;
                Family::Histogram(HistogramFamily(vec))
            }
            MetricKind::Summary(opts) => {
                let family =
                    SummaryFamily::new(descriptor.name(), descriptor.help(), &keys, opts.clone())?;
                self.registry.register(Box::new(family.clone()))?;
                Family::Summary(family)
            }
        };

        tracing::debug!(
            metric = %descriptor.name(),
            kind = %kind,
            label_keys = ?descriptor.label_keys(),
            "Registered metric"
        );

        registered.insert(
            descriptor.name().to_string(),
            Registered {
                descriptor,
                kind,
                family: family.clone(),
            },
        );
        Ok(family)
    }

    /// Names of every metric registered through this registry
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let families = self.registry.gather();
        tracing::debug!(families = families.len(), "Rendering exposition");

        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
            tracing::error!(error = %e, families = families.len(), "Exposition encoding failed");
            return Err(e);
        }

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "exposition is not UTF-8 past byte {}",
                e.utf8_error().valid_up_to()
            ))
        })
    }
}
