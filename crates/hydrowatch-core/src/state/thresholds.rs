//! Per-device threshold configuration

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

use crate::error::ConfigError;
use crate::models::ThresholdConfig;

/// Holds the active thresholds for every device
///
/// Devices without an explicit entry use the process-wide default. A `set`
/// only affects evaluations that start after it returns.
#[derive(Debug)]
pub struct ThresholdStore {
    defaults: ThresholdConfig,
    overrides: RwLock<HashMap<String, ThresholdConfig>>,
}

impl ThresholdStore {
    /// Create a store, validating the default config
    pub fn new(defaults: ThresholdConfig) -> Result<Self, ConfigError> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            overrides: RwLock::new(HashMap::new()),
        })
    }

    /// Thresholds in effect for `device_id`
    pub fn get(&self, device_id: &str) -> ThresholdConfig {
        self.overrides
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Replace the thresholds for `device_id`
    ///
    /// Invalid bounds are rejected and the previous config stays in effect.
    pub fn set(&self, device_id: &str, config: ThresholdConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.overrides.write().insert(device_id.to_string(), config);
        info!(device_id = %device_id, "Thresholds updated");
        Ok(())
    }

    /// Drop the override for `device_id`, reverting it to the defaults
    ///
    /// Returns whether an override existed.
    pub fn remove(&self, device_id: &str) -> bool {
        let removed = self.overrides.write().remove(device_id).is_some();
        if removed {
            info!(device_id = %device_id, "Thresholds reset to defaults");
        }
        removed
    }

    /// The process-wide default config
    pub fn defaults(&self) -> &ThresholdConfig {
        &self.defaults
    }

    /// Devices with an explicit config, sorted
    pub fn configured_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.overrides.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `device_id` has an explicit config
    pub fn is_configured(&self, device_id: &str) -> bool {
        self.overrides.read().contains_key(device_id)
    }
}

impl Default for ThresholdStore {
    fn default() -> Self {
        Self {
            defaults: ThresholdConfig::default(),
            overrides: RwLock::new(HashMap::new()),
        }
    }
}
