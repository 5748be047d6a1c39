//! Persistence for HydroWatch
//!
//! Readings and alerts go to PostgreSQL through [`PostgresSink`], or to the
//! log through [`LocalSink`] when the database is disabled.

mod local;
mod postgres;
mod sink;

pub use local::LocalSink;
pub use postgres::{PostgresPool, PostgresSink};
pub use sink::PersistenceSink;

use std::sync::Arc;

use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Connect to the configured sink
///
/// Returns the pool as well when a database is in use so callers can run
/// health checks against it.
pub async fn connect(
    config: &DatabaseConfig,
) -> Result<(Arc<dyn PersistenceSink>, Option<PostgresPool>)> {
    if !config.enabled {
        info!("Database disabled, running in local mode");
        return Ok((Arc::new(LocalSink), None));
    }

    let pool = PostgresPool::new(config).await?;
    pool.health_check().await?;
    info!("Database connection healthy");

    let sink = PostgresSink::new(&pool);
    Ok((Arc::new(sink), Some(pool)))
}
