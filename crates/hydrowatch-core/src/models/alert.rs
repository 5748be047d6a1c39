//! Alert data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use uuid::Uuid;

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[default]
    Warning,
    /// Critical
    Critical,
}

impl Severity {
    /// Lowercase name, as stored and sent on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Which edge of a band was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    /// Value fell below the minimum
    Min,
    /// Value rose above the maximum
    Max,
}

impl BoundKind {
    /// Lowercase name, as stored and sent on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// A single threshold violation
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique identifier
    pub id: Uuid,

    /// Device that produced the reading
    pub device_id: String,

    /// Metric that left its band
    pub metric_name: String,

    /// The value that triggered the alert
    pub observed_value: f64,

    /// The bound that was crossed
    pub violated_bound: f64,

    /// Whether `violated_bound` is the band's min or max
    pub bound_kind: BoundKind,

    /// Severity level
    pub severity: Severity,

    /// Timestamp of the offending reading
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: DateTime<Utc>,

    /// Human-readable message
    pub message: String,
}
