//! API routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::broadcast::ws_handler;

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Latest device state
        .route("/api/v1/sensors/latest", get(handlers::list_latest))
        .route("/api/v1/sensors/latest/:device_id", get(handlers::get_latest))

        // Manual ingestion
        .route("/api/v1/sensors/data", post(handlers::ingest_reading))

        // Thresholds
        .route(
            "/api/v1/thresholds/:device_id",
            get(handlers::get_thresholds)
                .put(handlers::put_thresholds)
                .delete(handlers::delete_thresholds),
        )

        // Counters
        .route("/api/v1/stats", get(handlers::stats))
        .route("/metrics", get(handlers::metrics))

        // Real-time streaming
        .route("/ws", get(ws_handler))

        .with_state(state)
}
