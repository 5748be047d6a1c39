//! Collector module - telemetry ingestion
//!
//! The collector receives readings from the MQTT bus and the HTTP ingest
//! endpoint, runs them through the [`IngestionGateway`], and hands the slow
//! work (storage and fan-out) to dedicated workers over bounded queues.

mod bus;
mod gateway;
mod pipeline;

pub use bus::BusListener;
pub use gateway::{GatewayStats, IngestOutcome, IngestionGateway, PersistJob, RawMessage};
pub use pipeline::{BroadcastWorker, PersistenceWorker, PipelineConfig};

use std::future::Future;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alerting::ThresholdEvaluator;
use crate::api::{AppState, HttpServer};
use crate::broadcast::{start_heartbeat, BroadcastHub};
use crate::config::Config;
use crate::db::{self, PersistenceSink};
use crate::error::{Error, Result};
use crate::models::BroadcastPayload;
use crate::state::{StateCache, ThresholdStore};

/// The main collector service
pub struct Collector {
    config: Config,
    gateway: Arc<IngestionGateway>,
    hub: Arc<BroadcastHub>,
    sink: Arc<dyn PersistenceSink>,
    persist_rx: Option<mpsc::Receiver<PersistJob>>,
    broadcast_rx: Option<mpsc::Receiver<BroadcastPayload>>,
    prometheus: Option<PrometheusHandle>,
    shutdown: CancellationToken,
}

impl Collector {
    /// Create a collector, connecting to the configured sink
    pub async fn new(config: Config) -> Result<Self> {
        let (sink, _pool) = db::connect(&config.database).await?;
        Self::with_sink(config, sink)
    }

    /// Create a collector writing to `sink`
    pub fn with_sink(config: Config, sink: Arc<dyn PersistenceSink>) -> Result<Self> {
        let thresholds = ThresholdStore::new(config.thresholds.defaults.clone())?;
        let evaluator =
            ThresholdEvaluator::with_critical_fraction(config.alerting.critical_band_fraction);

        let (persist_tx, persist_rx) = mpsc::channel(config.ingestion.persist_queue_size.max(1));
        let (broadcast_tx, broadcast_rx) =
            mpsc::channel(config.ingestion.broadcast_queue_size.max(1));

        let gateway = Arc::new(IngestionGateway::new(
            Arc::new(StateCache::new()),
            Arc::new(thresholds),
            evaluator,
            persist_tx,
            broadcast_tx,
        ));

        Ok(Self {
            config,
            gateway,
            hub: Arc::new(BroadcastHub::new()),
            sink,
            persist_rx: Some(persist_rx),
            broadcast_rx: Some(broadcast_rx),
            prometheus: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// Serve `/metrics` from an installed Prometheus recorder
    pub fn set_prometheus(&mut self, handle: PrometheusHandle) {
        self.prometheus = Some(handle);
    }

    /// Run until Ctrl+C or [`Collector::shutdown_token`] is cancelled
    pub async fn start(&mut self) -> Result<()> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Ctrl+C received, shutting down...");
        };
        self.run_until(ctrl_c).await
    }

    /// Run until `signal` completes or the shutdown token is cancelled
    pub async fn run_until<F>(&mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Starting HydroWatch collector...");

        let (Some(persist_rx), Some(broadcast_rx)) =
            (self.persist_rx.take(), self.broadcast_rx.take())
        else {
            return Err(Error::internal("collector already started"));
        };

        // Cancelled only after the bus listener has stopped.
        let workers_stop = CancellationToken::new();

        let persistence = PersistenceWorker::new(
            PipelineConfig::from(&self.config.ingestion),
            Arc::clone(&self.sink),
        );
        let persistence_handle = tokio::spawn(persistence.run(persist_rx, workers_stop.clone()));

        let broadcaster = BroadcastWorker::new(Arc::clone(&self.hub));
        let broadcast_handle = tokio::spawn(broadcaster.run(broadcast_rx, workers_stop.clone()));

        let heartbeat_handle = start_heartbeat(
            Arc::clone(&self.hub),
            self.config.broadcast.heartbeat_interval,
            self.shutdown.clone(),
        );

        let bus_handle = if self.config.mqtt.enabled {
            let listener = BusListener::new(self.config.mqtt.clone(), Arc::clone(&self.gateway));
            Some(tokio::spawn(listener.run(self.shutdown.clone())))
        } else {
            info!("MQTT disabled, accepting readings over HTTP only");
            None
        };

        let state = AppState::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.hub),
            self.config.broadcast.subscriber_buffer,
        )
        .with_prometheus(self.prometheus.clone());
        let http_addr = self.config.http_addr();
        let http_shutdown = self.shutdown.clone();
        let http_handle = tokio::spawn(async move {
            if let Err(e) = HttpServer::new(state).serve(&http_addr, http_shutdown).await {
                error!(error = %e, "HTTP server error");
            }
        });

        tokio::select! {
            _ = signal => info!("Shutdown signal received"),
            _ = self.shutdown.cancelled() => info!("Shutdown requested"),
        }
        self.shutdown.cancel();

        if let Some(handle) = bus_handle {
            let _ = handle.await;
        }
        let _ = heartbeat_handle.await;

        workers_stop.cancel();
        let timeout = self.config.ingestion.shutdown_timeout;
        join_within(persistence_handle, "persistence", timeout).await;
        join_within(broadcast_handle, "broadcast", timeout).await;

        self.hub.close_all();
        join_within(http_handle, "http", timeout).await;

        info!("Collector stopped");
        Ok(())
    }

    /// Token that stops a running collector when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The ingestion gateway
    pub fn gateway(&self) -> Arc<IngestionGateway> {
        Arc::clone(&self.gateway)
    }

    /// The broadcast hub
    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.hub)
    }
}

async fn join_within(handle: JoinHandle<()>, task: &'static str, timeout: std::time::Duration) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task, error = %e, "Task failed"),
        Err(_) => {
            warn!(task, timeout_ms = timeout.as_millis() as u64, "Task did not stop in time");
            abort.abort();
        }
    }
}
