//! Configuration management for rpc-prometheus
//!
//! Parses TOML configuration files and provides typed access to the
//! instrumentation settings of each role.

use crate::error::{InstrumentError, InstrumentResult};
use crate::instrumentor::Role;
use crate::method::LabelGranularity;
use crate::summary::SummaryOpts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Fine-grained latency buckets for sub-second calls (seconds)
pub const FINE_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Coarse latency buckets for slow or long-running calls (seconds)
pub const COARSE_BUCKETS: [f64; 10] = [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: InstrumentationConfig,
    #[serde(default)]
    pub client: InstrumentationConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// The metrics an instrumentor maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMetric {
    /// `{prefix}_requests_total`
    Total,
    /// `{prefix}_requests_error_total`
    Error,
    /// `{prefix}_requests_in_progress`
    InProgress,
    /// `{prefix}_requests_duration_histogram_seconds`
    Histogram,
    /// `{prefix}_requests_duration_summary_seconds`
    Summary,
}

impl CallMetric {
    pub const ALL: [CallMetric; 5] = [
        CallMetric::Total,
        CallMetric::Error,
        CallMetric::InProgress,
        CallMetric::Histogram,
        CallMetric::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallMetric::Total => "total",
            CallMetric::Error => "error",
            CallMetric::InProgress => "in_progress",
            CallMetric::Histogram => "histogram",
            CallMetric::Summary => "summary",
        }
    }
}

/// Subset of [`CallMetric`]s enabled for an instrumentor
///
/// Defaults to everything except the summary, whose sliding window costs
/// memory per label tuple.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EnabledMetrics(BTreeSet<CallMetric>);

impl EnabledMetrics {
    pub fn all() -> Self {
        Self(CallMetric::ALL.into_iter().collect())
    }

    pub fn contains(&self, metric: CallMetric) -> bool {
        self.0.contains(&metric)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = CallMetric> + '_ {
        self.0.iter().copied()
    }
}

impl Default for EnabledMetrics {
    fn default() -> Self {
        [
            CallMetric::Total,
            CallMetric::Error,
            CallMetric::InProgress,
            CallMetric::Histogram,
        ]
        .into_iter()
        .collect()
    }
}

impl FromIterator<CallMetric> for EnabledMetrics {
    fn from_iter<I: IntoIterator<Item = CallMetric>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Named bucket presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketPreset {
    Fine,
    Coarse,
}

impl BucketPreset {
    pub fn values(&self) -> &'static [f64] {
        match self {
            BucketPreset::Fine => &FINE_BUCKETS,
            BucketPreset::Coarse => &COARSE_BUCKETS,
        }
    }
}

/// Raw TOML form of `buckets`: a preset name or an explicit list
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BucketsSpec {
    Preset(BucketPreset),
    Custom(Vec<f64>),
}

/// Validated histogram bucket boundaries
///
/// Always non-empty, finite and strictly increasing. Validation runs during
/// deserialization, so an invalid `Buckets` cannot exist.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "BucketsSpec", into = "BucketsSpec")]
pub struct Buckets {
    preset: Option<BucketPreset>,
    values: Vec<f64>,
}

impl Buckets {
    pub fn preset(preset: BucketPreset) -> Self {
        Self {
            preset: Some(preset),
            values: preset.values().to_vec(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if `values` is empty, contains a non-finite value, or
    /// is not strictly increasing.
    pub fn custom(values: Vec<f64>) -> InstrumentResult<Self> {
        if values.is_empty() {
            return Err(InstrumentError::Config(
                "buckets must contain at least one boundary".to_string(),
            ));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(InstrumentError::Config(format!(
                "buckets must be finite numbers, got {}",
                bad
            )));
        }
        if let Some(pair) = values.windows(2).find(|w| w[0] >= w[1]) {
            return Err(InstrumentError::Config(format!(
                "buckets must be strictly increasing, got {} followed by {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self {
            preset: None,
            values,
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl Default for Buckets {
    fn default() -> Self {
        Self::preset(BucketPreset::Fine)
    }
}

impl TryFrom<BucketsSpec> for Buckets {
    type Error = String;

    fn try_from(spec: BucketsSpec) -> Result<Self, Self::Error> {
        match spec {
            BucketsSpec::Preset(preset) => Ok(Self::preset(preset)),
            BucketsSpec::Custom(values) => Self::custom(values).map_err(|e| e.to_string()),
        }
    }
}

impl From<Buckets> for BucketsSpec {
    fn from(buckets: Buckets) -> Self {
        match buckets.preset {
            Some(preset) => BucketsSpec::Preset(preset),
            None => BucketsSpec::Custom(buckets.values),
        }
    }
}

/// Validated summary quantile objectives
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Quantiles(Vec<f64>);

impl Quantiles {
    /// # Errors
    ///
    /// Returns an error unless `values` is non-empty, strictly increasing and
    /// every value lies strictly between 0 and 1.
    pub fn new(values: Vec<f64>) -> InstrumentResult<Self> {
        if values.is_empty() {
            return Err(InstrumentError::Config(
                "summary.quantiles must contain at least one objective".to_string(),
            ));
        }
        if let Some(bad) = values.iter().find(|q| !(**q > 0.0 && **q < 1.0)) {
            return Err(InstrumentError::Config(format!(
                "summary.quantiles must lie strictly between 0 and 1, got {}",
                bad
            )));
        }
        if values.windows(2).any(|w| w[0] >= w[1]) {
            return Err(InstrumentError::Config(format!(
                "summary.quantiles must be unique and ascending, got {:?}",
                values
            )));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

impl Default for Quantiles {
    fn default() -> Self {
        Self(vec![0.5, 0.9, 0.99])
    }
}

impl TryFrom<Vec<f64>> for Quantiles {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(values).map_err(|e| e.to_string())
    }
}

impl From<Quantiles> for Vec<f64> {
    fn from(quantiles: Quantiles) -> Self {
        quantiles.0
    }
}

/// Summary window configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SummaryConfig {
    #[serde(default)]
    pub quantiles: Quantiles,
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
    #[serde(default = "default_age_buckets")]
    pub age_buckets: u32,
}

impl SummaryConfig {
    pub fn to_opts(&self) -> SummaryOpts {
        SummaryOpts {
            quantiles: self.quantiles.values().to_vec(),
            max_age: Duration::from_secs(self.max_age_seconds),
            age_buckets: self.age_buckets,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            quantiles: Quantiles::default(),
            max_age_seconds: default_max_age_seconds(),
            age_buckets: default_age_buckets(),
        }
    }
}

fn default_max_age_seconds() -> u64 {
    600
}

fn default_age_buckets() -> u32 {
    5
}

/// Instrumentation settings for one role
///
/// Fields are private; construct via deserialization or the `with_*`
/// builders and check with [`validate`](Self::validate).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InstrumentationConfig {
    /// Metric name prefix; defaults to the role name (`client`/`server`)
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    label_granularity: LabelGranularity,
    #[serde(default)]
    enabled_metrics: EnabledMetrics,
    #[serde(default)]
    buckets: Buckets,
    /// When set, unclassified failures are counted under this error_code
    #[serde(default)]
    unclassified_error_label: Option<String>,
    #[serde(default)]
    summary: SummaryConfig,
}

impl InstrumentationConfig {
    /// Prefix for `role`, falling back to the role's default
    pub fn prefix(&self, role: Role) -> &str {
        self.prefix.as_deref().unwrap_or(role.default_prefix())
    }

    pub fn label_granularity(&self) -> LabelGranularity {
        self.label_granularity
    }

    pub fn enabled_metrics(&self) -> &EnabledMetrics {
        &self.enabled_metrics
    }

    pub fn buckets(&self) -> &Buckets {
        &self.buckets
    }

    pub fn unclassified_error_label(&self) -> Option<&str> {
        self.unclassified_error_label.as_deref()
    }

    pub fn summary(&self) -> &SummaryConfig {
        &self.summary
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_label_granularity(mut self, granularity: LabelGranularity) -> Self {
        self.label_granularity = granularity;
        self
    }

    pub fn with_enabled_metrics(mut self, metrics: EnabledMetrics) -> Self {
        self.enabled_metrics = metrics;
        self
    }

    pub fn with_buckets(mut self, buckets: Buckets) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_unclassified_error_label(mut self, label: impl Into<String>) -> Self {
        self.unclassified_error_label = Some(label.into());
        self
    }

    pub fn with_summary(mut self, summary: SummaryConfig) -> Self {
        self.summary = summary;
        self
    }

    /// Validate settings that cannot be checked during deserialization
    ///
    /// `section` names the TOML table in error messages.
    pub fn validate(&self, section: &str) -> InstrumentResult<()> {
        if let Some(prefix) = &self.prefix {
            if !is_valid_metric_name(prefix) {
                return Err(InstrumentError::Config(format!(
                    "{}.prefix '{}' is not a valid Prometheus metric name. \
                    Use letters, digits, '_' or ':' and do not start with a digit.",
                    section, prefix
                )));
            }
        }

        if self.enabled_metrics.is_empty() {
            return Err(InstrumentError::Config(format!(
                "{}.enabled_metrics is empty. Enable at least one of: total, error, \
                in_progress, histogram, summary.",
                section
            )));
        }

        if let Some(label) = &self.unclassified_error_label {
            if label.trim().is_empty() {
                return Err(InstrumentError::Config(format!(
                    "{}.unclassified_error_label must not be blank",
                    section
                )));
            }
        }

        if self.summary.max_age_seconds == 0 {
            return Err(InstrumentError::Config(format!(
                "{}.summary.max_age_seconds must be greater than 0",
                section
            )));
        }

        if self.summary.age_buckets == 0 {
            return Err(InstrumentError::Config(format!(
                "{}.summary.age_buckets must be greater than 0",
                section
            )));
        }

        Ok(())
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Prometheus metric names match `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> InstrumentResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            InstrumentError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self =
            toml::from_str(&content).map_err(|source| InstrumentError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| InstrumentError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Instrumentation settings for `role`
    pub fn for_role(&self, role: Role) -> &InstrumentationConfig {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()`; call it explicitly when building a Config by
    /// other means.
    pub fn validate(&self) -> InstrumentResult<()> {
        self.server.validate("server")?;
        self.client.validate("client")?;

        let server_prefix = self.server.prefix(Role::Server);
        let client_prefix = self.client.prefix(Role::Client);
        if server_prefix == client_prefix {
            tracing::warn!(
                prefix = %server_prefix,
                "Client and server share a metric prefix; their label schemas must match"
            );
        }

        Ok(())
    }
}
