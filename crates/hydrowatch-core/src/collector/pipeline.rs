//! Background workers behind the ingestion gateway
//!
//! The persistence worker batches readings for efficiency and writes alerts
//! as they come. The broadcast worker hands payloads to the hub in queue
//! order. On shutdown both close their queue and drain what is left.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broadcast::BroadcastHub;
use crate::config::IngestionConfig;
use crate::db::PersistenceSink;
use crate::models::{AlertEvent, BroadcastPayload, Reading};

use super::gateway::PersistJob;

/// Persistence worker configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of readings to batch before writing
    pub batch_size: usize,
    /// Maximum time to wait before flushing a partial batch
    pub batch_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(1000),
        }
    }
}

impl From<&IngestionConfig> for PipelineConfig {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_timeout: config.batch_timeout(),
        }
    }
}

/// Writes readings and alerts to the persistence sink
pub struct PersistenceWorker {
    config: PipelineConfig,
    sink: Arc<dyn PersistenceSink>,
}

impl PersistenceWorker {
    /// Create a worker writing to `sink`
    pub fn new(config: PipelineConfig, sink: Arc<dyn PersistenceSink>) -> Self {
        Self { config, sink }
    }

    /// Consume jobs until the queue closes or `shutdown` fires
    pub async fn run(self, mut rx: mpsc::Receiver<PersistJob>, shutdown: CancellationToken) {
        let batch_size = self.config.batch_size;
        info!(
            batch_size,
            timeout_ms = self.config.batch_timeout.as_millis() as u64,
            "Persistence worker started"
        );

        let mut batch: Vec<Arc<Reading>> = Vec::with_capacity(batch_size);
        let mut flush_interval = interval(self.config.batch_timeout);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    rx.close();
                    break;
                }

                job = rx.recv() => match job {
                    Some(job) => self.process(job, &mut batch).await,
                    None => break,
                },

                _ = flush_interval.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }

        let mut drained = 0usize;
        while let Some(job) = rx.recv().await {
            self.process(job, &mut batch).await;
            drained += 1;
        }
        self.flush(&mut batch).await;

        info!(drained, "Persistence worker stopped");
    }

    async fn process(&self, job: PersistJob, batch: &mut Vec<Arc<Reading>>) {
        match job {
            PersistJob::Reading(reading) => {
                batch.push(reading);
                if batch.len() >= self.config.batch_size {
                    self.flush(batch).await;
                }
            }
            PersistJob::Alert(alert) => self.write_alert(&alert).await,
        }
    }

    async fn flush(&self, batch: &mut Vec<Arc<Reading>>) {
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        debug!(count, "Flushing reading batch");

        if let Err(e) = self.sink.write_readings(batch).await {
            let lost = e.lost(count);
            error!(count, lost, error = %e, "Failed to persist reading batch");
            metrics::counter!("hydrowatch_persistence_failures_total", "kind" => "reading")
                .increment(lost as u64);
        }

        batch.clear();
    }

    async fn write_alert(&self, alert: &AlertEvent) {
        if let Err(e) = self.sink.write_alert(alert).await {
            error!(
                alert_id = %alert.id,
                device_id = %alert.device_id,
                error = %e,
                "Failed to persist alert"
            );
            metrics::counter!("hydrowatch_persistence_failures_total", "kind" => "alert")
                .increment(1);
        }
    }
}

/// Publishes queued payloads to the broadcast hub
pub struct BroadcastWorker {
    hub: Arc<BroadcastHub>,
}

impl BroadcastWorker {
    /// Create a worker publishing to `hub`
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }

    /// Consume payloads until the queue closes or `shutdown` fires
    pub async fn run(self, mut rx: mpsc::Receiver<BroadcastPayload>, shutdown: CancellationToken) {
        info!("Broadcast worker started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    rx.close();
                    break;
                }

                payload = rx.recv() => match payload {
                    Some(payload) => {
                        self.hub.publish(&payload);
                    }
                    None => break,
                },
            }
        }

        let mut drained = 0usize;
        while let Some(payload) = rx.recv().await {
            self.hub.publish(&payload);
            drained += 1;
        }

        info!(drained, "Broadcast worker stopped");
    }
}
