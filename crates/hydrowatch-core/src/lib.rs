//! # HydroWatch
//!
//! Telemetry ingestion for hydroponic sensor networks.
//!
//! HydroWatch keeps the latest state of every device, evaluates each reading
//! against per-device alert thresholds, persists readings and alerts, and
//! streams both to live observers over WebSocket.
//!
//! ## Architecture
//!
//! - **Collector**: MQTT listener and ingestion gateway, with background
//!   persistence and broadcast workers
//! - **State**: in-memory device cache and threshold store
//! - **Alerting**: band evaluation with warning/critical severity
//! - **Broadcast**: subscriber registry with drop-if-slow fan-out
//! - **Storage**: PostgreSQL, or log-only local mode
//! - **API**: REST API, Prometheus metrics and the WebSocket endpoint
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the collector
//! hydrowatch serve
//!
//! # Without a broker, ingesting over HTTP only
//! hydrowatch serve --no-mqtt
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod api;
pub mod broadcast;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::ThresholdEvaluator;
    pub use crate::broadcast::BroadcastHub;
    pub use crate::collector::{Collector, IngestOutcome, IngestionGateway, RawMessage};
    pub use crate::config::Config;
    pub use crate::db::PersistenceSink;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::state::{StateCache, ThresholdStore};
}
