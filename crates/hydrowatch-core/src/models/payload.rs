//! Frames pushed to live subscribers

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{AlertEvent, DeviceState, Reading};

/// Tagged payload delivered by the broadcast hub
///
/// Serialized as `{"type": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BroadcastPayload {
    /// Full state cache, sent once when a subscriber connects
    Snapshot(Vec<DeviceState>),
    /// An accepted reading
    Reading(Arc<Reading>),
    /// A threshold violation
    Alert(Arc<AlertEvent>),
}

impl BroadcastPayload {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Reading(_) => "reading",
            Self::Alert(_) => "alert",
        }
    }
}
