//! Bounded per-sensor reading history.
//!
//! The `BufferStore` is the single point of shared mutable state on the
//! ingestion path: a mapping from sensor id to a fixed-capacity ring of the
//! most recent readings. Insertion evicts the oldest reading once a ring is
//! full. All mutation and the snapshot operation share one mutex, so the
//! aggregator always sees a consistent cut across every sensor for one
//! cycle and never observes a half-written ring. The critical sections do
//! pure in-memory bookkeeping, never I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::protocol::Reading;

/// Thread-safe store of bounded per-sensor reading rings.
#[derive(Debug)]
pub struct BufferStore {
    capacity: usize,
    buffers: Mutex<HashMap<String, VecDeque<Reading>>>,
}

impl BufferStore {
    /// Create a store whose rings hold at most `capacity` readings each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// The per-sensor ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Reading>>> {
        // A poisoned mutex only means another holder panicked; the map
        // itself is still a consistent set of rings.
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a reading to its sensor's ring, evicting the oldest entry if
    /// the ring is at capacity.
    pub fn record(&self, reading: Reading) {
        let mut buffers = self.lock();
        let ring = buffers
            .entry(reading.sensor_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(reading);
    }

    /// Copy out all rings under a single critical section.
    ///
    /// This is a snapshot, not a drain: the rings keep their contents, and
    /// a later snapshot over unchanged rings returns the same readings.
    pub fn snapshot(&self) -> HashMap<String, Vec<Reading>> {
        let buffers = self.lock();
        buffers
            .iter()
            .map(|(id, ring)| (id.clone(), ring.iter().cloned().collect()))
            .collect()
    }

    /// Number of sensors with at least one recorded reading.
    pub fn sensor_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reading(sensor: &str, temperature: f64, second: u32) -> Reading {
        Reading {
            sensor_id: sensor.to_string(),
            temperature,
            humidity: 50.0,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, second).unwrap(),
        }
    }

    #[test]
    fn retains_exactly_the_last_n_in_arrival_order() {
        let store = BufferStore::new(5);
        for i in 0..8 {
            store.record(reading("s1", i as f64, i));
        }

        let snapshot = store.snapshot();
        let ring = &snapshot["s1"];
        assert_eq!(ring.len(), 5);
        let temps: Vec<f64> = ring.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn snapshot_is_a_copy_not_a_drain() {
        let store = BufferStore::new(5);
        store.record(reading("s1", 20.0, 0));

        let first = store.snapshot();
        let second = store.snapshot();
        assert_eq!(first["s1"], second["s1"]);
        assert_eq!(store.sensor_count(), 1);
    }

    #[test]
    fn sensors_are_buffered_independently() {
        let store = BufferStore::new(2);
        store.record(reading("a", 1.0, 0));
        store.record(reading("b", 2.0, 1));
        store.record(reading("a", 3.0, 2));
        store.record(reading("a", 5.0, 3));

        let snapshot = store.snapshot();
        assert_eq!(snapshot["a"].len(), 2);
        assert_eq!(snapshot["b"].len(), 1);
        assert_eq!(snapshot["a"][0].temperature, 3.0);
    }

    #[test]
    fn concurrent_records_never_tear_a_snapshot() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(BufferStore::new(5));
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..500 {
                    store.record(reading("s1", i as f64, 0));
                }
            })
        };

        for _ in 0..100 {
            let snapshot = store.snapshot();
            if let Some(ring) = snapshot.get("s1") {
                assert!(ring.len() <= 5);
            }
        }
        writer.join().unwrap();
        assert_eq!(store.snapshot()["s1"].len(), 5);
    }
}
