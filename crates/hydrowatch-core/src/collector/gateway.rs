//! Per-message ingestion path

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::alerting::ThresholdEvaluator;
use crate::error::DecodeError;
use crate::models::{AlertEvent, BroadcastPayload, Reading};
use crate::state::{StateCache, ThresholdStore};

/// A message as delivered by the bus or the HTTP ingest endpoint
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Bus topic, if the message came from the bus
    pub topic: Option<String>,
    /// Undecoded body
    pub payload: Bytes,
}

impl RawMessage {
    /// Message received on a bus topic
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: Some(topic.into()),
            payload: payload.into(),
        }
    }

    /// Message with no topic
    pub fn from_body(payload: impl Into<Bytes>) -> Self {
        Self {
            topic: None,
            payload: payload.into(),
        }
    }
}

/// Work for the persistence worker
#[derive(Debug, Clone)]
pub enum PersistJob {
    /// Accepted reading
    Reading(Arc<Reading>),
    /// Raised alert
    Alert(Arc<AlertEvent>),
}

/// What happened to one message
#[derive(Debug)]
pub enum IngestOutcome {
    /// Decoded, cached, evaluated and queued for persistence and fan-out
    Accepted {
        /// Device the reading belongs to
        device_id: String,
        /// Alerts raised by the reading
        alerts: Vec<Arc<AlertEvent>>,
    },
    /// Discarded before touching any state
    Rejected(DecodeError),
}

impl IngestOutcome {
    /// Whether the message was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Point-in-time gateway counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Readings accepted
    pub accepted: u64,
    /// Messages rejected at decode
    pub rejected: u64,
    /// Alerts raised
    pub alerts_raised: u64,
    /// Persistence jobs dropped because the queue was full or closed
    pub persistence_dropped: u64,
    /// Broadcast payloads dropped because the queue was full or closed
    pub broadcast_dropped: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    alerts_raised: AtomicU64,
    persistence_dropped: AtomicU64,
    broadcast_dropped: AtomicU64,
}

/// Drives every inbound message through the pipeline
///
/// `handle` is synchronous and never waits on storage or subscribers: the
/// slow work is handed to the persistence and broadcast workers over bounded
/// queues. When a queue is full the job is dropped and counted, while the
/// cache update and evaluation still happen.
pub struct IngestionGateway {
    cache: Arc<StateCache>,
    thresholds: Arc<ThresholdStore>,
    evaluator: ThresholdEvaluator,
    persist_tx: mpsc::Sender<PersistJob>,
    broadcast_tx: mpsc::Sender<BroadcastPayload>,
    counters: Counters,
}

impl IngestionGateway {
    /// Create a gateway feeding the given worker queues
    pub fn new(
        cache: Arc<StateCache>,
        thresholds: Arc<ThresholdStore>,
        evaluator: ThresholdEvaluator,
        persist_tx: mpsc::Sender<PersistJob>,
        broadcast_tx: mpsc::Sender<BroadcastPayload>,
    ) -> Self {
        Self {
            cache,
            thresholds,
            evaluator,
            persist_tx,
            broadcast_tx,
            counters: Counters::default(),
        }
    }

    /// Process one message
    pub fn handle(&self, raw: RawMessage) -> IngestOutcome {
        let reading = match Reading::decode(raw.topic.as_deref(), &raw.payload, Utc::now()) {
            Ok(reading) => Arc::new(reading),
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("hydrowatch_readings_rejected_total").increment(1);
                warn!(
                    topic = raw.topic.as_deref().unwrap_or("-"),
                    bytes = raw.payload.len(),
                    error = %e,
                    "Rejected message"
                );
                return IngestOutcome::Rejected(e);
            }
        };

        self.cache.update(Arc::clone(&reading));
        self.enqueue_persist(PersistJob::Reading(Arc::clone(&reading)));

        let config = self.thresholds.get(&reading.device_id);
        let alerts: Vec<Arc<AlertEvent>> = self
            .evaluator
            .evaluate(&reading, &config)
            .into_iter()
            .map(Arc::new)
            .collect();

        for alert in &alerts {
            info!(
                device_id = %alert.device_id,
                metric = %alert.metric_name,
                value = alert.observed_value,
                bound = alert.violated_bound,
                severity = alert.severity.as_str(),
                "Alert raised"
            );
            self.enqueue_persist(PersistJob::Alert(Arc::clone(alert)));
            self.enqueue_broadcast(BroadcastPayload::Alert(Arc::clone(alert)));
        }

        self.enqueue_broadcast(BroadcastPayload::Reading(Arc::clone(&reading)));

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("hydrowatch_readings_accepted_total").increment(1);
        if !alerts.is_empty() {
            self.counters
                .alerts_raised
                .fetch_add(alerts.len() as u64, Ordering::Relaxed);
            metrics::counter!("hydrowatch_alerts_raised_total").increment(alerts.len() as u64);
        }
        debug!(
            device_id = %reading.device_id,
            metrics = reading.metrics.len(),
            alerts = alerts.len(),
            "Reading accepted"
        );

        IngestOutcome::Accepted {
            device_id: reading.device_id.clone(),
            alerts,
        }
    }

    /// Current counters
    pub fn stats(&self) -> GatewayStats {
        let c = &self.counters;
        GatewayStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            alerts_raised: c.alerts_raised.load(Ordering::Relaxed),
            persistence_dropped: c.persistence_dropped.load(Ordering::Relaxed),
            broadcast_dropped: c.broadcast_dropped.load(Ordering::Relaxed),
        }
    }

    /// The cache this gateway updates
    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    /// The threshold store this gateway reads
    pub fn thresholds(&self) -> &Arc<ThresholdStore> {
        &self.thresholds
    }

    fn enqueue_persist(&self, job: PersistJob) {
        if let Err(e) = self.persist_tx.try_send(job) {
            self.counters.persistence_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("hydrowatch_jobs_dropped_total", "queue" => "persistence")
                .increment(1);
            log_dropped("persistence", &e);
        }
    }

    fn enqueue_broadcast(&self, payload: BroadcastPayload) {
        if let Err(e) = self.broadcast_tx.try_send(payload) {
            self.counters.broadcast_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("hydrowatch_jobs_dropped_total", "queue" => "broadcast")
                .increment(1);
            log_dropped("broadcast", &e);
        }
    }
}

fn log_dropped<T>(queue: &'static str, e: &TrySendError<T>) {
    match e {
        TrySendError::Full(_) => warn!(queue, "Queue full, job dropped"),
        TrySendError::Closed(_) => debug!(queue, "Queue closed, job dropped"),
    }
}
