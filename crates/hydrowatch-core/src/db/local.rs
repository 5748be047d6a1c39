//! Log-only sink used when no database is configured

use async_trait::async_trait;
use tracing::debug;

use crate::error::PersistenceError;
use crate::models::{AlertEvent, Reading};

use super::sink::PersistenceSink;

/// Sink that records writes in the log and discards them
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSink;

#[async_trait]
impl PersistenceSink for LocalSink {
    async fn write_reading(&self, reading: &Reading) -> Result<(), PersistenceError> {
        debug!(
            device_id = %reading.device_id,
            timestamp = %reading.timestamp,
            metrics = reading.metrics.len(),
            "Reading (local mode)"
        );
        Ok(())
    }

    async fn write_alert(&self, alert: &AlertEvent) -> Result<(), PersistenceError> {
        debug!(
            alert_id = %alert.id,
            device_id = %alert.device_id,
            metric = %alert.metric_name,
            severity = alert.severity.as_str(),
            "Alert (local mode)"
        );
        Ok(())
    }
}
