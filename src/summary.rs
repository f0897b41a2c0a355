//! Sliding-window summary metric
//!
//! The prometheus crate ships counters, gauges and histograms but no summary,
//! so [`SummaryFamily`] implements [`Collector`] directly and renders proto
//! `SUMMARY` families that the stock `TextEncoder` understands.
//!
//! Each child keeps `age_buckets` sub-windows that together span `max_age`.
//! Quantiles are computed (nearest rank) over the live window only; `_sum` and
//! `_count` are cumulative, as in the other Prometheus clients.

use prometheus::core::{Collector, Desc};
use prometheus::proto;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::registry::Timer;

/// Upper bound on samples retained per sub-window
pub const MAX_SAMPLES_PER_BUCKET: usize = 2048;

/// Quantile objectives and window shape for a summary
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOpts {
    pub quantiles: Vec<f64>,
    pub max_age: Duration,
    pub age_buckets: u32,
}

impl Default for SummaryOpts {
    fn default() -> Self {
        Self {
            quantiles: vec![0.5, 0.9, 0.99],
            max_age: Duration::from_secs(600),
            age_buckets: 5,
        }
    }
}

/// Point-in-time view of one summary child
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    pub count: u64,
    pub sum: f64,
    /// `(objective, value)`; value is NaN when the window is empty
    pub quantiles: Vec<(f64, f64)>,
}

#[derive(Debug)]
struct AgeBucket {
    samples: Vec<f64>,
    seen: usize,
}

impl AgeBucket {
    fn new() -> Self {
        Self {
            samples: Vec::new(),
            seen: 0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() < MAX_SAMPLES_PER_BUCKET {
            self.samples.push(value);
        } else {
            self.samples[self.seen % MAX_SAMPLES_PER_BUCKET] = value;
        }
        self.seen = self.seen.wrapping_add(1);
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.seen = 0;
    }
}

#[derive(Debug)]
struct Window {
    buckets: Vec<AgeBucket>,
    head: usize,
    rotated_at: Instant,
    span: Duration,
    count: u64,
    sum: f64,
}

impl Window {
    fn new(opts: &SummaryOpts) -> Self {
        let age_buckets = opts.age_buckets.max(1);
        Self {
            buckets: (0..age_buckets).map(|_| AgeBucket::new()).collect(),
            head: 0,
            rotated_at: Instant::now(),
            span: opts.max_age / age_buckets,
            count: 0,
            sum: 0.0,
        }
    }

    /// Expire sub-windows older than `max_age`
    fn rotate(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.rotated_at);
        if self.span.is_zero() || elapsed < self.span {
            return;
        }

        let steps = (elapsed.as_nanos() / self.span.as_nanos()) as usize;
        if steps >= self.buckets.len() {
            self.buckets.iter_mut().for_each(AgeBucket::clear);
            self.rotated_at = now;
            return;
        }

        for _ in 0..steps {
            self.head = (self.head + 1) % self.buckets.len();
            self.buckets[self.head].clear();
            self.rotated_at += self.span;
        }
    }

    fn observe(&mut self, value: f64) {
        self.rotate(Instant::now());
        self.buckets[self.head].push(value);
        self.count += 1;
        self.sum += value;
    }

    fn snapshot(&mut self, objectives: &[f64]) -> SummarySnapshot {
        self.rotate(Instant::now());

        let mut samples: Vec<f64> = self
            .buckets
            .iter()
            .flat_map(|b| b.samples.iter().copied())
            .collect();
        samples.sort_by(f64::total_cmp);

        let quantiles = objectives
            .iter()
            .map(|q| (*q, nearest_rank(&samples, *q)))
            .collect();

        SummarySnapshot {
            count: self.count,
            sum: self.sum,
            quantiles,
        }
    }
}

fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// One label tuple's summary
#[derive(Clone, Debug)]
pub struct SummaryChild {
    objectives: Arc<[f64]>,
    window: Arc<Mutex<Window>>,
}

impl SummaryChild {
    fn new(opts: &SummaryOpts) -> Self {
        Self {
            objectives: opts.quantiles.clone().into(),
            window: Arc::new(Mutex::new(Window::new(opts))),
        }
    }

    pub fn observe(&self, value: f64) {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(value);
    }

    pub fn start_timer(&self) -> Timer {
        Timer::start()
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(&self.objectives)
    }

    pub fn sample_count(&self) -> u64 {
        self.snapshot().count
    }

    pub fn sample_sum(&self) -> f64 {
        self.snapshot().sum
    }
}

struct SummaryCore {
    desc: Desc,
    label_keys: Vec<String>,
    opts: SummaryOpts,
    children: RwLock<HashMap<Vec<String>, SummaryChild>>,
}

/// A labeled family of windowed summaries
#[derive(Clone)]
pub struct SummaryFamily {
    core: Arc<SummaryCore>,
}

impl SummaryFamily {
    /// # Errors
    ///
    /// Returns an error if the name or label keys are not valid Prometheus
    /// identifiers.
    pub fn new(
        name: &str,
        help: &str,
        label_keys: &[&str],
        opts: SummaryOpts,
    ) -> Result<Self, prometheus::Error> {
        let label_keys: Vec<String> = label_keys.iter().map(|k| k.to_string()).collect();
        if label_keys.iter().any(|k| k == "quantile") {
            return Err(prometheus::Error::Msg(format!(
                "summary '{}' cannot use reserved label key 'quantile'",
                name
            )));
        }

        let desc = Desc::new(
            name.to_string(),
            help.to_string(),
            label_keys.clone(),
            HashMap::new(),
        )?;

        Ok(Self {
            core: Arc::new(SummaryCore {
                desc,
                label_keys,
                opts,
                children: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn opts(&self) -> &SummaryOpts {
        &self.core.opts
    }

    /// Get or create the child for `values`
    ///
    /// # Errors
    ///
    /// Returns `InconsistentCardinality` when `values` does not match the
    /// family's label keys.
    pub fn get_metric_with_label_values(
        &self,
        values: &[&str],
    ) -> Result<SummaryChild, prometheus::Error> {
        if values.len() != self.core.label_keys.len() {
            return Err(prometheus::Error::InconsistentCardinality {
                expect: self.core.label_keys.len(),
                got: values.len(),
            });
        }

        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();

        if let Some(child) = self
            .core
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(child.clone());
        }

        let mut children = self
            .core
            .children
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let child = children
            .entry(key)
            .or_insert_with(|| SummaryChild::new(&self.core.opts));
        Ok(child.clone())
    }

    fn label_pairs(&self, values: &[String]) -> Vec<proto::LabelPair> {
        let mut pairs: Vec<proto::LabelPair> = self
            .core
            .label_keys
            .iter()
            .zip(values)
            .map(|(key, value)| {
                let mut pair = proto::LabelPair::default();
                pair.set_name(key.clone());
                pair.set_value(value.clone());
                pair
            })
            .collect();
        pairs.sort_by(|a, b| a.name().cmp(b.name()));
        pairs
    }
}

impl Collector for SummaryFamily {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.core.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let children: Vec<(Vec<String>, SummaryChild)> = self
            .core
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(values, child)| (values.clone(), child.clone()))
            .collect();

        let metrics: Vec<proto::Metric> = children
            .iter()
            .map(|(values, child)| {
                let snapshot = child.snapshot();

                let mut summary = proto::Summary::default();
                summary.set_sample_count(snapshot.count);
                summary.set_sample_sum(snapshot.sum);
                summary.quantile = snapshot
                    .quantiles
                    .iter()
                    .map(|(objective, value)| {
                        let mut quantile = proto::Quantile::default();
                        quantile.set_quantile(*objective);
                        quantile.set_value(*value);
                        quantile
                    })
                    .collect();

                let mut metric = proto::Metric::default();
                metric.label = self.label_pairs(values);
                metric.summary = Some(summary).into();
                metric
            })
            .collect();

        let mut family = proto::MetricFamily::default();
        family.set_name(self.core.desc.fq_name.clone());
        family.set_help(self.core.desc.help.clone());
        family.set_type(proto::MetricType::SUMMARY);
        family.metric = metrics;
        vec![family]
    }
}
