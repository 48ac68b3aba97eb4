//! Command types for runtime control of a running relay.
//!
//! Reconfiguration requests travel over an mpsc channel to the relay
//! application; each command variant embeds a `oneshot::Sender` so the
//! caller can await the outcome. The helper constructors return the command
//! together with its receiver, which keeps the request-response pairing
//! impossible to forget at the call site.
//!
//! Invalid input (an out-of-range port, a battery level above 100) is
//! rejected with a [`RelayError`] and the prior configuration stays live.

use std::net::SocketAddr;
use tokio::sync::oneshot;

use crate::error::{RelayError, RelayResult};

/// Runtime control commands accepted by [`crate::app::RelayApp`].
#[derive(Debug)]
pub enum RelayCommand {
    /// Re-bind the ingestion listener on a new address.
    RebindListener {
        /// The new listening address.
        addr: SocketAddr,
        /// Outcome of the rebind.
        respond_to: oneshot::Sender<RelayResult<()>>,
    },
    /// Point the forwarding transport at a new collector address.
    SetCollectorAddr {
        /// The new collector address.
        addr: SocketAddr,
        /// Outcome of the update.
        respond_to: oneshot::Sender<RelayResult<()>>,
    },
    /// Manually override the simulated battery level.
    SetBatteryLevel {
        /// The new level, 0-100.
        level: u8,
        /// Outcome of the override.
        respond_to: oneshot::Sender<RelayResult<()>>,
    },
    /// Current depth of the outgoing batch queue.
    QueueDepth {
        /// The depth at the time the command is serviced.
        respond_to: oneshot::Sender<usize>,
    },
    /// Stop all background tasks and end the command loop.
    Shutdown {
        /// Acknowledged once the shutdown signal is sent.
        respond_to: oneshot::Sender<()>,
    },
}

impl RelayCommand {
    /// Build a listener rebind command and its response receiver.
    pub fn rebind_listener(addr: SocketAddr) -> (Self, oneshot::Receiver<RelayResult<()>>) {
        let (respond_to, rx) = oneshot::channel();
        (Self::RebindListener { addr, respond_to }, rx)
    }

    /// Build a collector address update and its response receiver.
    pub fn set_collector_addr(addr: SocketAddr) -> (Self, oneshot::Receiver<RelayResult<()>>) {
        let (respond_to, rx) = oneshot::channel();
        (Self::SetCollectorAddr { addr, respond_to }, rx)
    }

    /// Build a battery override command and its response receiver.
    pub fn set_battery_level(level: u8) -> (Self, oneshot::Receiver<RelayResult<()>>) {
        let (respond_to, rx) = oneshot::channel();
        (Self::SetBatteryLevel { level, respond_to }, rx)
    }

    /// Build a queue depth query and its response receiver.
    pub fn queue_depth() -> (Self, oneshot::Receiver<usize>) {
        let (respond_to, rx) = oneshot::channel();
        (Self::QueueDepth { respond_to }, rx)
    }

    /// Build a shutdown command and its acknowledgement receiver.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (respond_to, rx) = oneshot::channel();
        (Self::Shutdown { respond_to }, rx)
    }
}

/// Map a dropped response channel to the closed-channel error.
pub(crate) fn closed<T>(_: T) -> RelayError {
    RelayError::CommandChannelClosed
}
