//! Sensor reading data model and inbound decoding

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};

use crate::error::DecodeError;

/// Well-known metric names
pub mod metric {
    /// Nutrient solution pH
    pub const PH: &str = "ph";
    /// Water temperature (°C)
    pub const WATER_TEMP: &str = "water_temp";
    /// Air temperature (°C)
    pub const AIR_TEMP: &str = "air_temp";
    /// Relative humidity (%)
    pub const HUMIDITY: &str = "humidity";
    /// Electrical conductivity (µS/cm)
    pub const EC: &str = "ec";
    /// Total dissolved solids (ppm)
    pub const TDS: &str = "tds";
    /// Light intensity (lux)
    pub const LUX: &str = "lux";
    /// Full-spectrum light channel
    pub const FULL_SPECTRUM: &str = "full_spectrum";
    /// Infrared light channel
    pub const INFRARED: &str = "infrared";
    /// Visible light channel
    pub const VISIBLE: &str = "visible";
}

/// Human-readable label for a metric, used in alert messages
pub fn display_name(name: &str) -> &str {
    match name {
        metric::PH => "pH",
        metric::WATER_TEMP => "Water temperature",
        metric::AIR_TEMP => "Air temperature",
        metric::HUMIDITY => "Humidity",
        metric::EC => "EC",
        metric::TDS => "TDS",
        metric::LUX => "Light intensity",
        metric::FULL_SPECTRUM => "Full-spectrum light",
        metric::INFRARED => "Infrared light",
        metric::VISIBLE => "Visible light",
        other => other,
    }
}

/// Metric values carried by one reading
///
/// Every well-known field is optional since devices report partial samples.
/// Unknown numeric keys land in `extra` and are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Nutrient solution pH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ph: Option<f64>,

    /// Water temperature (°C)
    #[serde(default, alias = "water_temp_c", skip_serializing_if = "Option::is_none")]
    pub water_temp: Option<f64>,

    /// Air temperature (°C)
    #[serde(default, alias = "air_temp_c", skip_serializing_if = "Option::is_none")]
    pub air_temp: Option<f64>,

    /// Relative humidity (%)
    #[serde(default, alias = "humidity_percent", skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,

    /// Electrical conductivity (µS/cm)
    #[serde(default, alias = "ec_us_cm", skip_serializing_if = "Option::is_none")]
    pub ec: Option<f64>,

    /// Total dissolved solids (ppm)
    #[serde(default, alias = "tds_ppm", skip_serializing_if = "Option::is_none")]
    pub tds: Option<f64>,

    /// Light intensity (lux)
    #[serde(default, alias = "light_lux", skip_serializing_if = "Option::is_none")]
    pub lux: Option<f64>,

    /// Full-spectrum light channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_spectrum: Option<f64>,

    /// Infrared light channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrared: Option<f64>,

    /// Visible light channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<f64>,

    /// Additional metrics not known to this version
    #[serde(flatten)]
    pub extra: BTreeMap<String, f64>,
}

impl Metrics {
    /// Iterate over the metrics present, well-known fields first, then
    /// extra metrics in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        let known: [(&str, Option<f64>); 10] = [
            (metric::PH, self.ph),
            (metric::WATER_TEMP, self.water_temp),
            (metric::AIR_TEMP, self.air_temp),
            (metric::HUMIDITY, self.humidity),
            (metric::EC, self.ec),
            (metric::TDS, self.tds),
            (metric::LUX, self.lux),
            (metric::FULL_SPECTRUM, self.full_spectrum),
            (metric::INFRARED, self.infrared),
            (metric::VISIBLE, self.visible),
        ];

        known
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .chain(self.extra.iter().map(|(name, value)| (name.as_str(), *value)))
    }

    /// Look up a metric by name
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            metric::PH => self.ph,
            metric::WATER_TEMP => self.water_temp,
            metric::AIR_TEMP => self.air_temp,
            metric::HUMIDITY => self.humidity,
            metric::EC => self.ec,
            metric::TDS => self.tds,
            metric::LUX => self.lux,
            metric::FULL_SPECTRUM => self.full_spectrum,
            metric::INFRARED => self.infrared,
            metric::VISIBLE => self.visible,
            other => self.extra.get(other).copied(),
        }
    }

    /// Number of metrics present
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no metric is present
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// One telemetry sample from one device
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Reporting device
    pub device_id: String,

    /// Sample time (device clock, or gateway clock when the device sent none)
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: DateTime<Utc>,

    /// Sampled values
    pub metrics: Metrics,
}

/// Timestamp as it appears on the wire
#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    /// Epoch milliseconds
    Millis(i64),
    /// Epoch milliseconds with a fractional part
    FractionalMillis(f64),
    /// RFC 3339 string
    Text(DateTime<Utc>),
    /// ISO 8601 string without an offset, taken as UTC
    Naive(NaiveDateTime),
}

impl WireTimestamp {
    fn resolve(self) -> Result<DateTime<Utc>, DecodeError> {
        let timestamp = match self {
            Self::Millis(ms) => from_millis(ms)?,
            Self::FractionalMillis(ms) => {
                let whole = ms.floor();
                if !whole.is_finite() || whole < i64::MIN as f64 || whole > i64::MAX as f64 {
                    return Err(DecodeError::InvalidTimestamp(ms.to_string()));
                }
                from_millis(whole as i64)?
            }
            Self::Text(ts) => ts,
            Self::Naive(ts) => ts.and_utc(),
        };
        // Stored, cached and broadcast views all carry millisecond precision.
        Ok(timestamp.trunc_subsecs(3))
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DecodeError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| DecodeError::InvalidTimestamp(ms.to_string()))
}

/// Inbound message body published by devices
#[derive(Deserialize)]
struct ReadingMessage {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    timestamp: Option<WireTimestamp>,
    #[serde(default, alias = "metrics")]
    sensors: Metrics,
}

impl Reading {
    /// Build a reading directly
    pub fn new(device_id: impl Into<String>, timestamp: DateTime<Utc>, metrics: Metrics) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            metrics,
        }
    }

    /// Decode one bus message
    ///
    /// The device id comes from the payload, falling back to the topic
    /// (`<prefix>/devices/<id>/data`). Timestamps may be epoch milliseconds
    /// (integer or fractional) or ISO 8601 text; text without an offset is
    /// read as UTC. A missing timestamp is replaced by `received_at`. Every
    /// timestamp is truncated to whole milliseconds.
    pub fn decode(
        topic: Option<&str>,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<Self, DecodeError> {
        let message: ReadingMessage = serde_json::from_slice(payload)?;

        let device_id = match message.device_id {
            Some(id) => id,
            None => topic
                .and_then(device_id_from_topic)
                .map(str::to_string)
                .ok_or(DecodeError::MissingDeviceId)?,
        };
        let device_id = device_id.trim().to_string();
        if device_id.is_empty() {
            return Err(DecodeError::EmptyDeviceId);
        }

        let timestamp = match message.timestamp {
            Some(wire) => wire.resolve()?,
            None => received_at.trunc_subsecs(3),
        };

        if let Some((name, _)) = message.sensors.iter().find(|(_, v)| !v.is_finite()) {
            return Err(DecodeError::NonFiniteMetric(name.to_string()));
        }

        Ok(Self {
            device_id,
            timestamp,
            metrics: message.sensors,
        })
    }
}

/// Extract the device id segment from a `.../devices/<id>/...` topic
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let mut segments = topic.split('/');
    segments.find(|s| *s == "devices")?;
    segments.next().filter(|s| !s.is_empty() && *s != "+" && *s != "#")
}
