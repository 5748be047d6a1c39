//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hydrowatch::alerting::ThresholdEvaluator;
use hydrowatch::broadcast::{BroadcastHub, Frame, Subscriber, SubscriberId};
use hydrowatch::collector::{BroadcastWorker, IngestionGateway, PersistenceWorker, PipelineConfig};
use hydrowatch::db::PersistenceSink;
use hydrowatch::error::{DeliveryError, PersistenceError};
use hydrowatch::models::{AlertEvent, Reading, ThresholdConfig};
use hydrowatch::state::{StateCache, ThresholdStore};

/// Sink that keeps every write in memory.
#[derive(Default)]
pub struct MemorySink {
    pub readings: Mutex<Vec<Reading>>,
    pub alerts: Mutex<Vec<AlertEvent>>,
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn write_reading(&self, reading: &Reading) -> Result<(), PersistenceError> {
        self.readings.lock().push(reading.clone());
        Ok(())
    }

    async fn write_alert(&self, alert: &AlertEvent) -> Result<(), PersistenceError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

/// Sink whose every write fails.
#[derive(Default)]
pub struct FailingSink {
    pub attempts: AtomicUsize,
}

impl FailingSink {
    fn fail(&self) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::Encoding(
            serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        ))
    }
}

#[async_trait]
impl PersistenceSink for FailingSink {
    async fn write_reading(&self, _reading: &Reading) -> Result<(), PersistenceError> {
        self.fail()
    }

    async fn write_alert(&self, _alert: &AlertEvent) -> Result<(), PersistenceError> {
        self.fail()
    }
}

/// Sink that refuses readings from one device and stores the rest.
pub struct RejectingSink {
    pub rejected_device: String,
    pub inner: MemorySink,
}

impl RejectingSink {
    pub fn new(rejected_device: &str) -> Self {
        Self {
            rejected_device: rejected_device.to_string(),
            inner: MemorySink::default(),
        }
    }
}

#[async_trait]
impl PersistenceSink for RejectingSink {
    async fn write_reading(&self, reading: &Reading) -> Result<(), PersistenceError> {
        if reading.device_id == self.rejected_device {
            return Err(PersistenceError::Encoding(
                serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            ));
        }
        self.inner.write_reading(reading).await
    }

    async fn write_alert(&self, alert: &AlertEvent) -> Result<(), PersistenceError> {
        self.inner.write_alert(alert).await
    }
}

/// Subscriber whose connection is already gone.
pub struct BrokenSubscriber {
    id: SubscriberId,
    pub closed: AtomicUsize,
}

impl BrokenSubscriber {
    pub fn new() -> Self {
        Self {
            id: SubscriberId::new(),
            closed: AtomicUsize::new(0),
        }
    }
}

impl Subscriber for BrokenSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn send(&self, _frame: Frame) -> Result<(), DeliveryError> {
        Err(DeliveryError::Disconnected)
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A gateway wired to running workers.
pub struct Pipeline {
    pub gateway: Arc<IngestionGateway>,
    pub hub: Arc<BroadcastHub>,
    stop: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn start(defaults: ThresholdConfig, sink: Arc<dyn PersistenceSink>) -> Self {
        let (persist_tx, persist_rx) = mpsc::channel(1024);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(1024);
        let hub = Arc::new(BroadcastHub::new());
        let gateway = Arc::new(IngestionGateway::new(
            Arc::new(StateCache::new()),
            Arc::new(ThresholdStore::new(defaults).unwrap()),
            ThresholdEvaluator::new(),
            persist_tx,
            broadcast_tx,
        ));

        let stop = CancellationToken::new();
        let workers = vec![
            tokio::spawn(
                PersistenceWorker::new(PipelineConfig::default(), sink)
                    .run(persist_rx, stop.clone()),
            ),
            tokio::spawn(BroadcastWorker::new(Arc::clone(&hub)).run(broadcast_rx, stop.clone())),
        ];

        Self {
            gateway,
            hub,
            stop,
            workers,
        }
    }

    /// Stop the workers and wait until everything queued has been handled.
    pub async fn drain(self) {
        self.stop.cancel();
        for worker in self.workers {
            worker.await.unwrap();
        }
    }
}
