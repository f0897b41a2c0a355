//! Per-call measurement scope
//!
//! A [`CallScope`] is opened when a call starts and closed exactly once when
//! it ends. Opening increments the in-flight gauge and starts the timer;
//! closing records the outcome into every enabled metric. Dropping an open
//! scope closes it as cancelled (or as an unclassified failure while
//! unwinding), so no exit path leaves the gauge raised.

use crate::error::InstrumentResult;
use crate::instrumentor::CallMetrics;
use crate::registry::{GaugeChild, Timer};
use crate::status::{Classify, StatusCode};
use std::fmt;
use std::sync::Arc;

/// How a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// The fault carried a recognized status code
    ClassifiedFailed(StatusCode),
    /// The fault could not be mapped to a status code
    UnclassifiedFailed,
    /// The caller abandoned the call before it produced a result
    Cancelled,
}

impl Outcome {
    /// Classify a fault
    pub fn from_fault<E: Classify + ?Sized>(fault: &E) -> Self {
        match fault.status_code() {
            Some(code) if code != StatusCode::Ok => Outcome::ClassifiedFailed(code),
            _ => Outcome::UnclassifiedFailed,
        }
    }

    /// Classify a call result without consuming it
    pub fn from_result<T, E: Classify>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Outcome::Succeeded,
            Err(fault) => Outcome::from_fault(fault),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::ClassifiedFailed(_) => "classified_failed",
            Outcome::UnclassifiedFailed => "unclassified_failed",
            Outcome::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::ClassifiedFailed(code) => write!(f, "classified_failed({})", code),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What a closed scope recorded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeReport {
    pub outcome: Outcome,
    pub elapsed_seconds: f64,
}

/// Measurement scope of a single in-flight call
///
/// Not shared across calls. Close it with [`succeed`](Self::succeed),
/// [`fail`](Self::fail), [`finish`](Self::finish) or [`cancel`](Self::cancel),
/// or let it drop.
pub struct CallScope {
    metrics: Arc<CallMetrics>,
    identifier: String,
    labels: Vec<String>,
    in_progress: Option<GaugeChild>,
    timer: Timer,
    report: Option<ScopeReport>,
}

impl CallScope {
    pub(crate) fn open(metrics: Arc<CallMetrics>, identifier: &str) -> Self {
        let labels = metrics.resolver.labels(identifier);

        let in_progress = metrics.in_progress.as_ref().and_then(|family| {
            recorded(identifier, "in_progress", family.child(&label_refs(&labels)))
        });
        if let Some(gauge) = &in_progress {
            gauge.increment();
        }

        Self {
            metrics,
            identifier: identifier.to_string(),
            labels,
            in_progress,
            timer: Timer::start(),
            report: None,
        }
    }

    /// Call identifier this scope was opened for
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Resolved label values, in label-key order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_closed(&self) -> bool {
        self.report.is_some()
    }

    pub fn succeed(mut self) -> ScopeReport {
        self.close(Outcome::Succeeded)
    }

    pub fn fail<E: Classify + ?Sized>(mut self, fault: &E) -> ScopeReport {
        self.close(Outcome::from_fault(fault))
    }

    pub fn cancel(mut self) -> ScopeReport {
        self.close(Outcome::Cancelled)
    }

    /// Close with the outcome implied by `result`
    pub fn finish<T, E: Classify>(mut self, result: &Result<T, E>) -> ScopeReport {
        self.close(Outcome::from_result(result))
    }

    /// Close the scope with `outcome`
    ///
    /// Only the first call records anything. Later calls return the first
    /// report unchanged, whatever outcome they pass.
    pub fn close(&mut self, outcome: Outcome) -> ScopeReport {
        if let Some(report) = self.report {
            return report;
        }

        let elapsed_seconds = self.timer.stop();
        let metrics = &self.metrics;
        let identifier = self.identifier.as_str();
        let labels = label_refs(&self.labels);

        let error_code = match outcome {
            Outcome::ClassifiedFailed(code) => Some(code.as_str()),
            Outcome::UnclassifiedFailed => metrics.unclassified_error_label.as_deref(),
            Outcome::Succeeded | Outcome::Cancelled => None,
        };
        if let (Some(code), Some(errors)) = (error_code, &metrics.errors) {
            let mut values = labels.clone();
            values.push(code);
            if let Some(counter) = recorded(identifier, "error", errors.child(&values)) {
                counter.increment();
            }
        }

        if let Some(family) = &metrics.histogram {
            if let Some(histogram) = recorded(identifier, "histogram", family.child(&labels)) {
                histogram.observe(elapsed_seconds);
            }
        }

        if let Some(family) = &metrics.summary {
            if let Some(summary) = recorded(identifier, "summary", family.child(&labels)) {
                summary.observe(elapsed_seconds);
            }
        }

        if let Some(gauge) = self.in_progress.take() {
            gauge.decrement();
        }

        if let Some(family) = &metrics.total {
            if let Some(counter) = recorded(identifier, "total", family.child(&labels)) {
                counter.increment();
            }
        }

        tracing::debug!(
            role = %metrics.role,
            identifier = %identifier,
            outcome = %outcome,
            elapsed_seconds = elapsed_seconds,
            "Call closed"
        );

        let report = ScopeReport {
            outcome,
            elapsed_seconds,
        };
        self.report = Some(report);
        report
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        if self.report.is_none() {
            let outcome = if std::thread::panicking() {
                Outcome::UnclassifiedFailed
            } else {
                Outcome::Cancelled
            };
            self.close(outcome);
        }
    }
}

impl fmt::Debug for CallScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallScope")
            .field("identifier", &self.identifier)
            .field("labels", &self.labels)
            .field("report", &self.report)
            .finish()
    }
}

fn label_refs(labels: &[String]) -> Vec<&str> {
    labels.iter().map(String::as_str).collect()
}

/// Unwrap a child lookup, logging and dropping the update on failure
fn recorded<T>(identifier: &str, metric: &str, child: InstrumentResult<T>) -> Option<T> {
    match child {
        Ok(child) => Some(child),
        Err(e) => {
            tracing::warn!(
                identifier = %identifier,
                metric = %metric,
                error = %e,
                "Failed to record call metric"
            );
            None
        }
    }
}
