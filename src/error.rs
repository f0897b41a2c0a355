//! Error types for rpc-prometheus
//!
//! None of these errors ever reach an instrumented call. Configuration and
//! registration errors surface at startup; label resolution errors are
//! degraded into fallback labels by the caller.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    /// A metric name was registered twice with conflicting definitions.
    ///
    /// Fatal: indicates a configuration conflict, never a runtime condition.
    #[error("Metric '{name}' is already registered with an incompatible definition: {reason}")]
    IncompatibleRedefinition { name: String, reason: String },

    #[error("Malformed call identifier '{identifier}': expected \"/{{service}}/{{method}}\"")]
    MalformedIdentifier { identifier: String },

    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

impl InstrumentError {
    /// Whether this error must abort startup
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedIdentifier { .. })
    }
}

/// Convenience type alias for Results
pub type InstrumentResult<T> = Result<T, InstrumentError>;
