//! PostgreSQL connection and writes

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::warn;

use crate::config::DatabaseConfig;
use crate::error::{self, PersistenceError};
use crate::models::{AlertEvent, Reading};

use super::sink::{write_each, PersistenceSink};

const INSERT_READING: &str = r#"
    INSERT INTO sensor_readings (
        device_id, recorded_at, ph, water_temp, air_temp, humidity, ec, tds,
        lux, full_spectrum, infrared, visible, extra
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
    )
"#;

const INSERT_ALERT: &str = r#"
    INSERT INTO alerts (
        id, device_id, metric_name, severity, message, observed_value,
        threshold_value, bound_kind, raised_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9
    )
    ON CONFLICT (id) DO NOTHING
"#;

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Create a new PostgreSQL connection pool
    pub async fn new(config: &DatabaseConfig) -> error::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> error::Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> error::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Writes readings to `sensor_readings` and alerts to `alerts`
#[derive(Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Create a sink on top of an existing pool
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool.clone(),
        }
    }
}

#[async_trait]
impl PersistenceSink for PostgresSink {
    async fn write_reading(&self, reading: &Reading) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        insert_reading(&mut tx, reading).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn write_readings(&self, readings: &[Arc<Reading>]) -> Result<(), PersistenceError> {
        if readings.is_empty() {
            return Ok(());
        }

        match insert_batch(&self.pool, readings).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    count = readings.len(),
                    error = %e,
                    "Batch insert failed, retrying readings one by one"
                );
                write_each(self, readings).await
            }
        }
    }

    async fn write_alert(&self, alert: &AlertEvent) -> Result<(), PersistenceError> {
        sqlx::query(INSERT_ALERT)
            .bind(alert.id)
            .bind(&alert.device_id)
            .bind(&alert.metric_name)
            .bind(alert.severity.as_str())
            .bind(&alert.message)
            .bind(alert.observed_value)
            .bind(alert.violated_bound)
            .bind(alert.bound_kind.as_str())
            .bind(alert.timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn insert_batch(pool: &PgPool, readings: &[Arc<Reading>]) -> Result<(), PersistenceError> {
    let mut tx = pool.begin().await?;
    for reading in readings {
        insert_reading(&mut tx, reading).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn insert_reading(
    tx: &mut Transaction<'_, Postgres>,
    reading: &Reading,
) -> Result<(), PersistenceError> {
    let m = &reading.metrics;
    let extra = serde_json::to_value(&m.extra)?;

    sqlx::query(INSERT_READING)
        .bind(&reading.device_id)
        .bind(reading.timestamp)
        .bind(m.ph)
        .bind(m.water_temp)
        .bind(m.air_temp)
        .bind(m.humidity)
        .bind(m.ec)
        .bind(m.tds)
        .bind(m.lux)
        .bind(m.full_spectrum)
        .bind(m.infrared)
        .bind(m.visible)
        .bind(extra)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
