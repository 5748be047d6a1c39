//! Per-device latest known state

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Reading;

/// Latest reading seen for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Device this entry belongs to
    pub device_id: String,

    /// Most recently applied reading (by arrival, not by timestamp)
    pub last_reading: Arc<Reading>,

    /// Gateway clock when `last_reading` was applied
    pub last_seen: DateTime<Utc>,
}
