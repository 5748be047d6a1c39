//! Alert threshold configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::reading::metric;

/// Inclusive `[min, max]` band for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBounds {
    /// Lowest acceptable value
    pub min: f64,
    /// Highest acceptable value
    pub max: f64,
}

impl MetricBounds {
    /// Create a band
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies inside the band, edges included
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Band width (`max - min`)
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    fn validate(&self, metric: &str) -> Result<(), ConfigError> {
        if metric.trim().is_empty() {
            return Err(ConfigError::EmptyMetricName);
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConfigError::NonFiniteBound {
                metric: metric.to_string(),
            });
        }
        if self.min > self.max {
            return Err(ConfigError::InvertedBounds {
                metric: metric.to_string(),
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Alert bounds for one device, keyed by metric name
///
/// Serializes as a plain map: `{"ph": {"min": 5.5, "max": 6.5}, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdConfig {
    bounds: BTreeMap<String, MetricBounds>,
}

impl ThresholdConfig {
    /// A config with no bounds at all
    pub fn empty() -> Self {
        Self {
            bounds: BTreeMap::new(),
        }
    }

    /// Add or replace the band for `metric`
    #[must_use]
    pub fn with(mut self, metric: impl Into<String>, min: f64, max: f64) -> Self {
        self.bounds.insert(metric.into(), MetricBounds::new(min, max));
        self
    }

    /// Band configured for `metric`, if any
    pub fn bounds(&self, metric: &str) -> Option<&MetricBounds> {
        self.bounds.get(metric)
    }

    /// All configured bands in metric-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricBounds)> {
        self.bounds.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of metrics with a band
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Whether no band is configured
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Check every band; the first invalid one is reported
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bounds
            .iter()
            .try_for_each(|(metric, bounds)| bounds.validate(metric))
    }
}

impl Default for ThresholdConfig {
    /// Bands suited to leafy greens in a recirculating system
    fn default() -> Self {
        Self::empty()
            .with(metric::PH, 5.5, 6.5)
            .with(metric::WATER_TEMP, 18.0, 26.0)
            .with(metric::AIR_TEMP, 18.0, 28.0)
            .with(metric::HUMIDITY, 60.0, 70.0)
            .with(metric::EC, 1000.0, 2500.0)
    }
}

impl FromIterator<(String, MetricBounds)> for ThresholdConfig {
    fn from_iter<I: IntoIterator<Item = (String, MetricBounds)>>(iter: I) -> Self {
        Self {
            bounds: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ThresholdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bounds(metric::PH), Some(&MetricBounds::new(5.5, 6.5)));
        assert!(config.bounds(metric::LUX).is_none());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let config = ThresholdConfig::empty().with(metric::PH, 7.0, 5.5);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedBounds {
                metric: "ph".to_string(),
                min: 7.0,
                max: 5.5
            })
        );
    }

    #[test]
    fn test_equal_bounds_allowed() {
        let config = ThresholdConfig::empty().with(metric::EC, 1200.0, 1200.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_finite_and_unnamed_bounds_rejected() {
        let nan = ThresholdConfig::empty().with(metric::EC, f64::NAN, 10.0);
        assert!(matches!(nan.validate(), Err(ConfigError::NonFiniteBound { .. })));

        let unnamed = ThresholdConfig::empty().with(" ", 1.0, 2.0);
        assert_eq!(unnamed.validate(), Err(ConfigError::EmptyMetricName));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let config = ThresholdConfig::empty().with(metric::PH, 5.5, 7.0);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!({"ph": {"min": 5.5, "max": 7.0}}));

        let back: ThresholdConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
