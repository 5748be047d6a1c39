//! Threshold evaluation engine

use tracing::debug;
use uuid::Uuid;

use crate::models::reading::display_name;
use crate::models::{AlertEvent, BoundKind, MetricBounds, Reading, Severity, ThresholdConfig};

/// Outcome of checking one value against one band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    /// Edge that was crossed
    pub bound_kind: BoundKind,
    /// Value of that edge
    pub violated_bound: f64,
    /// Severity assigned to the excursion
    pub severity: Severity,
}

/// Turns readings into alert events
///
/// An excursion is `critical` when it goes past the breached bound by more
/// than `critical_fraction` of the band width, `warning` otherwise. With a
/// zero-width band every excursion is critical.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEvaluator {
    critical_fraction: f64,
}

impl ThresholdEvaluator {
    /// Fraction of the band width past which an excursion is critical
    pub const DEFAULT_CRITICAL_FRACTION: f64 = 0.10;

    /// Create an evaluator with the default severity cut
    pub fn new() -> Self {
        Self {
            critical_fraction: Self::DEFAULT_CRITICAL_FRACTION,
        }
    }

    /// Create an evaluator with a custom severity cut
    pub fn with_critical_fraction(critical_fraction: f64) -> Self {
        Self { critical_fraction }
    }

    /// Evaluate every metric of `reading` that has a band in `config`
    ///
    /// Absent metrics and metrics without a band are skipped. Each violation
    /// produces its own event.
    pub fn evaluate(&self, reading: &Reading, config: &ThresholdConfig) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        for (metric, observed) in reading.metrics.iter() {
            let Some(bounds) = config.bounds(metric) else {
                continue;
            };
            let Some(violation) = self.check(bounds, observed) else {
                continue;
            };

            debug!(
                device_id = %reading.device_id,
                metric,
                observed,
                bound = violation.violated_bound,
                severity = violation.severity.as_str(),
                "Threshold violated"
            );

            events.push(AlertEvent {
                id: Uuid::new_v4(),
                device_id: reading.device_id.clone(),
                metric_name: metric.to_string(),
                observed_value: observed,
                violated_bound: violation.violated_bound,
                bound_kind: violation.bound_kind,
                severity: violation.severity,
                timestamp: reading.timestamp,
                message: format_alert_message(metric, observed, &violation),
            });
        }

        events
    }

    /// Check one value against one band
    pub fn check(&self, bounds: &MetricBounds, observed: f64) -> Option<Violation> {
        let (bound_kind, violated_bound, excursion) = if observed < bounds.min {
            (BoundKind::Min, bounds.min, bounds.min - observed)
        } else if observed > bounds.max {
            (BoundKind::Max, bounds.max, observed - bounds.max)
        } else {
            return None;
        };

        let severity = if excursion > self.critical_fraction * bounds.width() {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Some(Violation {
            bound_kind,
            violated_bound,
            severity,
        })
    }
}

impl Default for ThresholdEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn format_alert_message(metric: &str, observed: f64, violation: &Violation) -> String {
    let direction = match violation.bound_kind {
        BoundKind::Min => "below minimum",
        BoundKind::Max => "above maximum",
    };

    format!(
        "{} {}: {:.2} (threshold {:.2})",
        display_name(metric),
        direction,
        observed,
        violation.violated_bound
    )
}
