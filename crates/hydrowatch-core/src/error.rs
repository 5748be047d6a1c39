//! Error types for HydroWatch
//!
//! The pipeline distinguishes four failure classes, none of which is fatal:
//! [`DecodeError`] for malformed inbound messages, [`PersistenceError`] for
//! failed sink writes, [`DeliveryError`] for a subscriber that cannot take a
//! frame, and [`ConfigError`] for rejected threshold bounds.

use thiserror::Error;

/// Result type alias using HydroWatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for HydroWatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound message could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Durable storage write failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Threshold configuration rejected
    #[error(transparent)]
    Threshold(#[from] ConfigError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// MQTT client error
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Configuration loading error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Not found error
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of thing looked up
        entity: String,
        /// Key that was not found
        id: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<::config::ConfigError> for Error {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// A bus message that could not be turned into a reading
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not valid JSON for a reading
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Neither the payload nor the topic carried a device id
    #[error("missing device_id")]
    MissingDeviceId,

    /// Device id present but blank
    #[error("empty device_id")]
    EmptyDeviceId,

    /// A metric value was NaN or infinite
    #[error("metric {0} is not a finite number")]
    NonFiniteMetric(String),

    /// Timestamp outside the representable range
    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(String),
}

/// A durable write that did not complete
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The database rejected or failed the write
    #[error("database write failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Record could not be encoded for storage
    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Some readings of a batch were not stored; the rest were
    #[error("{failed} of {total} readings not stored, last error: {last}")]
    Partial {
        /// Readings that were not stored
        failed: usize,
        /// Readings in the batch
        total: usize,
        /// Error of the last failed write
        last: Box<PersistenceError>,
    },
}

impl PersistenceError {
    /// Number of readings lost when a write of `attempted` readings fails
    pub fn lost(&self, attempted: usize) -> usize {
        match self {
            Self::Partial { failed, .. } => *failed,
            _ => attempted,
        }
    }
}

/// A subscriber that could not accept a frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Outbound queue is full; the subscriber is not keeping up
    #[error("subscriber is lagging")]
    Lagging,

    /// The connection behind the subscriber has gone away
    #[error("subscriber disconnected")]
    Disconnected,

    /// The payload could not be serialized; the subscriber is not at fault
    #[error("payload could not be encoded")]
    Encoding,
}

/// Invalid threshold bounds supplied for a metric
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `min` is greater than `max`
    #[error("{metric}: min ({min}) is greater than max ({max})")]
    InvertedBounds {
        /// Metric the bounds belong to
        metric: String,
        /// Lower bound supplied
        min: f64,
        /// Upper bound supplied
        max: f64,
    },

    /// A bound was NaN or infinite
    #[error("{metric}: bounds must be finite numbers")]
    NonFiniteBound {
        /// Metric the bounds belong to
        metric: String,
    },

    /// Metric name is empty
    #[error("metric name must not be empty")]
    EmptyMetricName,
}
