//! Wire types shared with sensors and the collector.
//!
//! The transport is TCP carrying UTF-8 JSON documents with newline-delimited
//! framing: exactly one document per `\n`-terminated line. Sensors send one
//! [`Reading`] per line; the relay sends one [`Batch`] per line to the
//! collector. A stream read is never assumed to coincide with a message
//! boundary - readers must accumulate a full line before decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RelayResult;

/// One measurement pushed by a leaf sensor. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Identifier of the producing sensor.
    pub sensor_id: String,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Capture time reported by the sensor, ISO-8601.
    pub timestamp: DateTime<Utc>,
}

/// The anomaly classes the relay detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Temperature above the configured high threshold.
    TemperatureHigh,
    /// Humidity below the configured low threshold.
    HumidityLow,
}

/// A single out-of-range reading, reported at most once per
/// (sensor, capture time) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Sensor that produced the offending reading.
    pub sensor_id: String,
    /// Which predicate fired.
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    /// The offending measurement value.
    pub value: f64,
    /// Capture time of the offending reading.
    pub timestamp: DateTime<Utc>,
}

/// Per-sensor arithmetic means over the buffered readings, rounded to two
/// decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceAverages {
    /// Mean temperature across the buffered readings.
    pub avg_temperature: f64,
    /// Mean humidity across the buffered readings.
    pub avg_humidity: f64,
}

/// One aggregation cycle's output. Created once per cycle, immutable
/// thereafter; queued, forwarded, then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Identifier of the producing relay.
    pub drone_id: String,
    /// Production time of the batch.
    pub timestamp: DateTime<Utc>,
    /// Averages per sensor. Sensors with an empty buffer never appear.
    pub averages: BTreeMap<String, SourceAverages>,
    /// Newly detected anomalies, in detection order.
    pub anomalies: Vec<Anomaly>,
}

impl Batch {
    /// True when the cycle produced neither averages nor anomalies.
    pub fn is_empty(&self) -> bool {
        self.averages.is_empty() && self.anomalies.is_empty()
    }
}

/// Serialize a value as one newline-terminated JSON frame.
pub fn encode_frame<T: Serialize>(value: &T) -> RelayResult<Vec<u8>> {
    let mut frame = serde_json::to_vec(value)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Decode one line as a sensor reading. Surrounding whitespace (including
/// the line terminator) is ignored.
pub fn decode_reading(line: &str) -> RelayResult<Reading> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Decode one line as a relay batch.
pub fn decode_batch(line: &str) -> RelayResult<Batch> {
    Ok(serde_json::from_str(line.trim())?)
}
