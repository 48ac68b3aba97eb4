//! Observation interface for the relay core.
//!
//! The core renders nothing. Instead it emits a stream of [`RelayEvent`]s on
//! a `tokio::sync::broadcast` channel that any presentation layer (GUI, TUI,
//! none at all) can subscribe to. Emission never blocks the core: absent or
//! lagging subscribers are simply skipped by the channel.

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio::sync::broadcast;

use crate::power::Mode;

/// Default broadcast capacity; laggards drop oldest events past this depth.
const DEFAULT_CAPACITY: usize = 256;

/// Observable happenings inside the relay core.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A sensor connection was accepted.
    SensorConnected {
        /// Per-connection session id.
        session: String,
        /// Peer address of the sensor.
        peer: SocketAddr,
    },
    /// A sensor connection ended (peer close or error).
    SensorDisconnected {
        /// Per-connection session id.
        session: String,
        /// Peer address of the sensor.
        peer: SocketAddr,
    },
    /// A valid reading was routed into the buffer store.
    ReadingAccepted {
        /// Sensor that produced the reading.
        sensor_id: String,
    },
    /// An aggregation cycle completed.
    BatchProduced {
        /// Production time of the batch.
        produced_at: DateTime<Utc>,
        /// Number of sensors with averages in the batch.
        sources: usize,
        /// Number of newly reported anomalies.
        anomalies: usize,
    },
    /// A batch reached the collector.
    BatchDelivered {
        /// Production time of the delivered batch.
        produced_at: DateTime<Utc>,
    },
    /// A batch was queued for later delivery.
    BatchQueued {
        /// Production time of the queued batch.
        produced_at: DateTime<Utc>,
        /// Outgoing queue depth after the enqueue.
        queue_depth: usize,
    },
    /// The simulated battery level changed (drain tick or manual override).
    BatteryLevelChanged {
        /// New battery level, 0-100.
        level: u8,
    },
    /// The operating mode crossed the threshold in either direction.
    ModeChanged {
        /// The mode entered.
        mode: Mode,
        /// Battery level at the transition.
        level: u8,
    },
    /// The ingestion listener re-bound to a new address.
    ListenerRebound {
        /// The new listening address.
        addr: SocketAddr,
    },
}

/// Cloneable handle to the relay's broadcast event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RelayEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus that retains up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. A bus without subscribers swallows the event.
    pub fn emit(&self, event: RelayEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
