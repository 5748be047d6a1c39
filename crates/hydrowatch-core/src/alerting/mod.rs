//! Alerting for HydroWatch
//!
//! Evaluates each reading against the device's threshold bands.

mod evaluator;

pub use evaluator::{ThresholdEvaluator, Violation};
