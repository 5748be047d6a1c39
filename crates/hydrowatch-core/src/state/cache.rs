//! Latest-reading cache

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::models::{DeviceState, Reading};

/// Device id → latest reading
///
/// Writes are last-write-wins by arrival order. The cache does not compare
/// timestamps, so a redelivered or late message for a device replaces a newer
/// one. Readers always observe a whole `DeviceState`, never a mix of two
/// updates.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: DashMap<String, DeviceState>,
}

impl StateCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a reading, creating the device entry on first sight
    pub fn update(&self, reading: Arc<Reading>) -> DeviceState {
        let state = DeviceState {
            device_id: reading.device_id.clone(),
            last_reading: reading,
            last_seen: Utc::now(),
        };
        self.entries.insert(state.device_id.clone(), state.clone());
        state
    }

    /// Current state for one device
    pub fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.entries.get(device_id).map(|entry| entry.value().clone())
    }

    /// Copy of every entry, sorted by device id
    pub fn list(&self) -> Vec<DeviceState> {
        let mut states: Vec<DeviceState> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        states.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        states
    }

    /// Number of devices that have ever reported
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no device has reported yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
