//! Periodic aggregation over the buffer store.
//!
//! Each cycle takes one consistent snapshot of every sensor ring, computes
//! the arithmetic mean of temperature and humidity per sensor (rounded to
//! two decimal places), and evaluates the anomaly predicates against every
//! buffered reading. An anomaly is reported at most once per
//! (sensor, capture time) pair: the dedup set remembers reported keys for a
//! configurable retention window, long enough to outlive any reading's
//! residence in its ring, so a reading that is still buffered on the next
//! cycle is not reported again.
//!
//! The resulting [`Batch`] - empty or not - is handed to the forwarding
//! relay, whose mode gate decides between delivery and queuing.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval_at;
use tracing::{debug, info};

use crate::buffer::BufferStore;
use crate::config::AggregatorConfig;
use crate::events::{EventBus, RelayEvent};
use crate::forwarder::ForwardingRelay;
use crate::protocol::{Anomaly, AnomalyKind, Batch, Reading, SourceAverages};

/// Remembers which (sensor, capture time) anomalies were already reported.
///
/// Keys are retained for a bounded window instead of growing for the
/// process lifetime; the window must exceed the longest time a reading can
/// stay buffered, which a few minutes covers by a wide margin for a
/// capacity-5 ring.
#[derive(Debug)]
pub struct AnomalyDedup {
    seen: HashMap<(String, DateTime<Utc>), Instant>,
    retention: Duration,
}

impl AnomalyDedup {
    /// Create a dedup set with the given key retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            retention,
        }
    }

    /// Record the key if unseen. Returns true when the anomaly is new and
    /// should be reported.
    pub fn mark(&mut self, sensor_id: &str, timestamp: DateTime<Utc>) -> bool {
        let key = (sensor_id.to_string(), timestamp);
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, Instant::now());
        true
    }

    /// Drop keys older than the retention window.
    pub fn evict_expired(&mut self) {
        let now = Instant::now();
        self.seen
            .retain(|_, marked_at| now.duration_since(*marked_at) < self.retention);
    }

    /// Number of retained keys.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when no keys are retained.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Runs the aggregation cycle on a fixed period.
#[derive(Debug)]
pub struct Aggregator {
    drone_id: String,
    store: Arc<BufferStore>,
    events: EventBus,
    period: Duration,
    temperature_high: f64,
    humidity_low: f64,
    dedup: AnomalyDedup,
}

impl Aggregator {
    /// Create an aggregator over `store`, configured by `config`.
    pub fn new(
        config: &AggregatorConfig,
        drone_id: String,
        store: Arc<BufferStore>,
        events: EventBus,
    ) -> Self {
        Self {
            drone_id,
            store,
            events,
            period: config.period,
            temperature_high: config.temperature_high,
            humidity_low: config.humidity_low,
            dedup: AnomalyDedup::new(config.dedup_retention),
        }
    }

    /// Run one aggregation cycle and produce its batch.
    pub fn collect_batch(&mut self) -> Batch {
        self.dedup.evict_expired();

        let snapshot = self.store.snapshot();
        let mut sources: Vec<(String, Vec<Reading>)> = snapshot.into_iter().collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));

        let mut averages = BTreeMap::new();
        let mut anomalies = Vec::new();

        for (sensor_id, readings) in sources {
            // Sensors with an empty ring are skipped entirely, which also
            // rules out a division by zero below.
            if readings.is_empty() {
                continue;
            }

            let count = readings.len() as f64;
            let temperature_sum: f64 = readings.iter().map(|r| r.temperature).sum();
            let humidity_sum: f64 = readings.iter().map(|r| r.humidity).sum();
            averages.insert(
                sensor_id.clone(),
                SourceAverages {
                    avg_temperature: round2(temperature_sum / count),
                    avg_humidity: round2(humidity_sum / count),
                },
            );

            for reading in &readings {
                if reading.temperature > self.temperature_high
                    && self.dedup.mark(&sensor_id, reading.timestamp)
                {
                    anomalies.push(Anomaly {
                        sensor_id: sensor_id.clone(),
                        kind: AnomalyKind::TemperatureHigh,
                        value: reading.temperature,
                        timestamp: reading.timestamp,
                    });
                }
                if reading.humidity < self.humidity_low
                    && self.dedup.mark(&sensor_id, reading.timestamp)
                {
                    anomalies.push(Anomaly {
                        sensor_id: sensor_id.clone(),
                        kind: AnomalyKind::HumidityLow,
                        value: reading.humidity,
                        timestamp: reading.timestamp,
                    });
                }
            }
        }

        let batch = Batch {
            drone_id: self.drone_id.clone(),
            timestamp: Utc::now(),
            averages,
            anomalies,
        };

        if !batch.anomalies.is_empty() {
            info!(
                anomalies = batch.anomalies.len(),
                "anomalous readings detected"
            );
        }
        debug!(
            sources = batch.averages.len(),
            anomalies = batch.anomalies.len(),
            "aggregation cycle complete"
        );
        self.events.emit(RelayEvent::BatchProduced {
            produced_at: batch.timestamp,
            sources: batch.averages.len(),
            anomalies: batch.anomalies.len(),
        });

        batch
    }

    /// Periodic aggregation loop. Runs until the shutdown signal fires.
    pub async fn run(mut self, relay: Arc<ForwardingRelay>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(tokio::time::Instant::now() + self.period, self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let batch = self.collect_batch();
                    relay.submit(batch).await;
                }
                _ = shutdown.changed() => {
                    debug!("aggregator task stopping");
                    break;
                }
            }
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
