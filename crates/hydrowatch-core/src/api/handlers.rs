//! API handlers for the HTTP REST API

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::broadcast::BroadcastHub;
use crate::collector::{GatewayStats, IngestOutcome, IngestionGateway, RawMessage};
use crate::models::{AlertEvent, DeviceState, ThresholdConfig};
use crate::state::{StateCache, ThresholdStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Ingestion entry point for manual submissions
    pub gateway: Arc<IngestionGateway>,
    /// Latest reading per device
    pub cache: Arc<StateCache>,
    /// Per-device thresholds
    pub thresholds: Arc<ThresholdStore>,
    /// Live subscriber registry
    pub hub: Arc<BroadcastHub>,
    /// Queue depth for each WebSocket subscriber
    pub subscriber_buffer: usize,
    /// Prometheus renderer, when the recorder is installed
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// State backed by `gateway`'s cache and thresholds
    pub fn new(
        gateway: Arc<IngestionGateway>,
        hub: Arc<BroadcastHub>,
        subscriber_buffer: usize,
    ) -> Self {
        Self {
            cache: Arc::clone(gateway.cache()),
            thresholds: Arc::clone(gateway.thresholds()),
            gateway,
            hub,
            subscriber_buffer,
            prometheus: None,
        }
    }

    /// Serve `/metrics` from `handle`
    #[must_use]
    pub fn with_prometheus(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.prometheus = handle;
        self
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the server answers
    pub status: String,
    /// Crate version
    pub version: String,
    /// Devices in the state cache
    pub devices: usize,
    /// Connected live subscribers
    pub subscribers: usize,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        devices: state.cache.len(),
        subscribers: state.hub.subscriber_count(),
    })
}

/// Latest state of every device
pub async fn list_latest(State(state): State<AppState>) -> Json<Vec<DeviceState>> {
    Json(state.cache.list())
}

/// Latest state of one device
pub async fn get_latest(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceState>, (StatusCode, String)> {
    state
        .cache
        .get(&device_id)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Device not found: {device_id}")))
}

/// Manual ingestion response
#[derive(Serialize)]
pub struct IngestResponse {
    /// Device the reading was recorded for
    pub device_id: String,
    /// Alerts the reading raised
    pub alerts: Vec<Arc<AlertEvent>>,
}

/// Push one reading through the same path as bus messages
///
/// The body uses the bus message format.
pub async fn ingest_reading(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), (StatusCode, String)> {
    match state.gateway.handle(RawMessage::from_body(body)) {
        IngestOutcome::Accepted { device_id, alerts } => Ok((
            StatusCode::ACCEPTED,
            Json(IngestResponse { device_id, alerts }),
        )),
        IngestOutcome::Rejected(e) => Err((StatusCode::BAD_REQUEST, e.to_string())),
    }
}

/// Thresholds in effect for a device
#[derive(Serialize)]
pub struct ThresholdsResponse {
    /// Device the thresholds apply to
    pub device_id: String,
    /// False when the device falls back to the defaults
    pub configured: bool,
    /// Bands in effect
    pub thresholds: ThresholdConfig,
}

impl ThresholdsResponse {
    fn load(store: &ThresholdStore, device_id: String) -> Self {
        Self {
            configured: store.is_configured(&device_id),
            thresholds: store.get(&device_id),
            device_id,
        }
    }
}

/// Get a device's thresholds
pub async fn get_thresholds(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<ThresholdsResponse> {
    Json(ThresholdsResponse::load(&state.thresholds, device_id))
}

/// Replace a device's thresholds
pub async fn put_thresholds(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(config): Json<ThresholdConfig>,
) -> Result<Json<ThresholdsResponse>, (StatusCode, String)> {
    state
        .thresholds
        .set(&device_id, config)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(ThresholdsResponse::load(&state.thresholds, device_id)))
}

/// Revert a device to the default thresholds
pub async fn delete_thresholds(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<ThresholdsResponse> {
    state.thresholds.remove(&device_id);
    Json(ThresholdsResponse::load(&state.thresholds, device_id))
}

/// Runtime counters
#[derive(Serialize)]
pub struct StatsResponse {
    /// Ingestion counters
    pub gateway: GatewayStats,
    /// Devices in the state cache
    pub devices: usize,
    /// Connected live subscribers
    pub subscribers: usize,
    /// Subscribers dropped since startup
    pub subscribers_dropped: u64,
    /// Devices with their own thresholds
    pub configured_devices: Vec<String>,
}

/// Gateway and hub counters
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        gateway: state.gateway.stats(),
        devices: state.cache.len(),
        subscribers: state.hub.subscriber_count(),
        subscribers_dropped: state.hub.dropped_total(),
        configured_devices: state.thresholds.configured_devices(),
    })
}

/// Prometheus exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics recorder not installed").into_response(),
    }
}
