//! Call identifier resolution
//!
//! Turns a framework call path such as `/helloworld.Greeter/SayHello` into the
//! `(service, method)` label pair used by every call metric.

use crate::error::{InstrumentError, InstrumentResult};
use serde::{Deserialize, Serialize};

/// Which labels identify a call
///
/// Changing this changes every metric's label schema, so it is a
/// compatibility-affecting choice: `Method` merges same-named methods of
/// different services into one time series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelGranularity {
    /// `{method}` only
    Method,
    /// `{service, method}`
    #[default]
    ServiceMethod,
}

impl LabelGranularity {
    /// Label keys for the call metrics, in order
    pub fn label_keys(&self) -> &'static [&'static str] {
        match self {
            LabelGranularity::Method => &["method"],
            LabelGranularity::ServiceMethod => &["service", "method"],
        }
    }
}

/// The resolved identity of one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    service: String,
    method: String,
}

impl CallIdentity {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Label values matching [`LabelGranularity::label_keys`]
    pub fn label_values(&self, granularity: LabelGranularity) -> Vec<String> {
        match granularity {
            LabelGranularity::Method => vec![self.method.clone()],
            LabelGranularity::ServiceMethod => vec![self.service.clone(), self.method.clone()],
        }
    }
}

/// Derives call labels from fully-qualified call identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodResolver {
    granularity: LabelGranularity,
}

impl MethodResolver {
    pub fn new(granularity: LabelGranularity) -> Self {
        Self { granularity }
    }

    pub fn granularity(&self) -> LabelGranularity {
        self.granularity
    }

    /// Parse `"/{service}/{method}"` strictly
    ///
    /// # Errors
    ///
    /// Returns `MalformedIdentifier` unless the identifier is a leading `/`
    /// followed by exactly two non-empty segments.
    pub fn resolve(&self, identifier: &str) -> InstrumentResult<CallIdentity> {
        let malformed = || InstrumentError::MalformedIdentifier {
            identifier: identifier.to_string(),
        };

        let rest = identifier.strip_prefix('/').ok_or_else(malformed)?;
        let (service, method) = rest.split_once('/').ok_or_else(malformed)?;
        if service.is_empty() || method.is_empty() || method.contains('/') {
            return Err(malformed());
        }

        Ok(CallIdentity::new(service, method))
    }

    /// Like [`resolve`](Self::resolve), but never fails
    ///
    /// A malformed identifier becomes the method label verbatim with an empty
    /// service label. Labeling degrades; the call proceeds.
    pub fn resolve_or_fallback(&self, identifier: &str) -> CallIdentity {
        match self.resolve(identifier) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(
                    identifier = %identifier,
                    error = %e,
                    "Falling back to raw identifier as method label"
                );
                CallIdentity::new("", identifier)
            }
        }
    }

    /// Resolve and return the label values for this resolver's granularity
    pub fn labels(&self, identifier: &str) -> Vec<String> {
        self.resolve_or_fallback(identifier)
            .label_values(self.granularity)
    }
}
