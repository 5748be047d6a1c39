//! Persistence sink abstraction

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::PersistenceError;
use crate::models::{AlertEvent, Reading};

/// Durable destination for accepted readings and raised alerts
///
/// Writes are driven by the persistence worker; ingestion never waits on
/// them.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Store one reading
    async fn write_reading(&self, reading: &Reading) -> Result<(), PersistenceError>;

    /// Store a batch of readings
    ///
    /// Each reading is written on its own, so one rejected reading does not
    /// cost the others. Failures are reported as
    /// [`PersistenceError::Partial`].
    async fn write_readings(&self, readings: &[Arc<Reading>]) -> Result<(), PersistenceError> {
        write_each(self, readings).await
    }

    /// Store one alert
    async fn write_alert(&self, alert: &AlertEvent) -> Result<(), PersistenceError>;
}

/// Write `readings` one at a time, collecting failures
pub(crate) async fn write_each<S>(
    sink: &S,
    readings: &[Arc<Reading>],
) -> Result<(), PersistenceError>
where
    S: PersistenceSink + ?Sized,
{
    let mut failed = 0;
    let mut last = None;
    for reading in readings {
        if let Err(e) = sink.write_reading(reading).await {
            warn!(device_id = %reading.device_id, error = %e, "Failed to persist reading");
            failed += 1;
            last = Some(e);
        }
    }

    match last {
        None => Ok(()),
        Some(last) => Err(PersistenceError::Partial {
            failed,
            total: readings.len(),
            last: Box::new(last),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    use crate::models::Metrics;

    /// Rejects readings from devices whose id contains a NUL byte
    #[derive(Default)]
    struct NulRejectingSink {
        stored: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PersistenceSink for NulRejectingSink {
        async fn write_reading(&self, reading: &Reading) -> Result<(), PersistenceError> {
            if reading.device_id.contains('\0') {
                return Err(PersistenceError::Encoding(
                    serde_json::from_str::<serde_json::Value>("\"\\u0000").unwrap_err(),
                ));
            }
            self.stored.lock().push(reading.device_id.clone());
            Ok(())
        }

        async fn write_alert(&self, _alert: &AlertEvent) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn reading(device: &str) -> Arc<Reading> {
        Arc::new(Reading::new(device, Utc::now(), Metrics::default()))
    }

    #[tokio::test]
    async fn test_one_bad_reading_does_not_sink_the_batch() {
        let sink = NulRejectingSink::default();
        let batch = [reading("D1"), reading("bad\0id"), reading("D3")];

        let err = sink.write_readings(&batch).await.unwrap_err();

        assert_eq!(*sink.stored.lock(), ["D1", "D3"]);
        assert!(matches!(err, PersistenceError::Partial { failed: 1, total: 3, .. }));
        assert_eq!(err.lost(batch.len()), 1);
    }

    #[tokio::test]
    async fn test_clean_batch_succeeds() {
        let sink = NulRejectingSink::default();
        let batch = [reading("D1"), reading("D2")];

        sink.write_readings(&batch).await.unwrap();

        assert_eq!(sink.stored.lock().len(), 2);
    }
}
