//! Battery drain simulation and operating-mode controller.
//!
//! The relay has two operating modes: `Normal`, in which batches are
//! delivered downstream, and `ReturnToBase`, in which they are queued
//! locally. The mode is derived from the simulated battery level: at or
//! below the configured threshold the relay is in `ReturnToBase`, above it
//! `Normal`. An automatic drain task lowers the level by one per tick down
//! to a floor of zero; a manual override assigns the level directly and
//! re-evaluates the threshold immediately, after which the drain continues
//! from the new level.
//!
//! State is published through a `tokio::sync::watch` channel so observers
//! (the forwarding relay's gate, any UI) see the latest value without
//! polling the controller. Level changes and mode transitions are also
//! emitted on the event bus.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

use crate::error::{RelayError, RelayResult};
use crate::events::{EventBus, RelayEvent};

/// Relay operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Batches are delivered to the collector.
    Normal,
    /// Batches are queued locally; no delivery attempts are made.
    ReturnToBase,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::ReturnToBase => write!(f, "return-to-base"),
        }
    }
}

/// Battery level and the mode derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerState {
    /// Battery level, 0-100.
    pub level: u8,
    /// Mode derived from the level/threshold comparison.
    pub mode: Mode,
}

/// Owns the power state and applies drain ticks and manual overrides.
#[derive(Debug)]
pub struct BatteryMonitor {
    state: watch::Sender<PowerState>,
    threshold: u8,
    events: EventBus,
}

impl BatteryMonitor {
    /// Create a monitor at `initial_level` with the given return-to-base
    /// threshold.
    pub fn new(initial_level: u8, threshold: u8, events: EventBus) -> RelayResult<Self> {
        if initial_level > 100 {
            return Err(RelayError::BatteryLevelOutOfRange(initial_level));
        }
        let mode = derive_mode(initial_level, threshold);
        let (state, _) = watch::channel(PowerState {
            level: initial_level,
            mode,
        });
        Ok(Self {
            state,
            threshold,
            events,
        })
    }

    /// Watch the power state. Receivers see every published change.
    pub fn subscribe(&self) -> watch::Receiver<PowerState> {
        self.state.subscribe()
    }

    /// The current power state.
    pub fn state(&self) -> PowerState {
        *self.state.borrow()
    }

    /// Manual override: assign the level directly and re-evaluate the
    /// threshold immediately. The automatic drain continues from here.
    pub fn set_level(&self, level: u8) -> RelayResult<()> {
        if level > 100 {
            return Err(RelayError::BatteryLevelOutOfRange(level));
        }
        info!(level, "battery level override");
        self.apply(level);
        Ok(())
    }

    /// One automatic drain step: level drops by one, floored at zero.
    fn tick(&self) {
        let level = self.state.borrow().level;
        if level > 0 {
            self.apply(level - 1);
        }
    }

    fn apply(&self, level: u8) {
        let previous = *self.state.borrow();
        let next = PowerState {
            level,
            mode: derive_mode(level, self.threshold),
        };
        if next == previous {
            return;
        }

        self.state.send_replace(next);
        if next.level != previous.level {
            debug!(level = next.level, "battery level changed");
            self.events
                .emit(RelayEvent::BatteryLevelChanged { level: next.level });
        }
        if next.mode != previous.mode {
            info!(mode = %next.mode, level = next.level, "operating mode changed");
            self.events.emit(RelayEvent::ModeChanged {
                mode: next.mode,
                level: next.level,
            });
        }
    }

    /// Periodic drain loop. Runs until the shutdown signal fires.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                _ = shutdown.changed() => {
                    debug!("battery drain task stopping");
                    break;
                }
            }
        }
    }
}

fn derive_mode(level: u8, threshold: u8) -> Mode {
    if level <= threshold {
        Mode::ReturnToBase
    } else {
        Mode::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(initial: u8) -> (BatteryMonitor, tokio::sync::broadcast::Receiver<RelayEvent>) {
        let events = EventBus::default();
        let rx = events.subscribe();
        let monitor = BatteryMonitor::new(initial, 20, events).unwrap();
        (monitor, rx)
    }

    fn mode_transitions(rx: &mut tokio::sync::broadcast::Receiver<RelayEvent>) -> Vec<Mode> {
        let mut transitions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RelayEvent::ModeChanged { mode, .. } = event {
                transitions.push(mode);
            }
        }
        transitions
    }

    #[test]
    fn crossing_the_threshold_transitions_exactly_once() {
        let (monitor, mut rx) = monitor(100);

        monitor.set_level(21).unwrap();
        monitor.set_level(20).unwrap();

        assert_eq!(monitor.state().mode, Mode::ReturnToBase);
        assert_eq!(mode_transitions(&mut rx), vec![Mode::ReturnToBase]);
    }

    #[test]
    fn rising_above_the_threshold_recovers_exactly_once() {
        let (monitor, mut rx) = monitor(19);
        assert_eq!(monitor.state().mode, Mode::ReturnToBase);

        monitor.set_level(21).unwrap();

        assert_eq!(monitor.state().mode, Mode::Normal);
        assert_eq!(mode_transitions(&mut rx), vec![Mode::Normal]);
    }

    #[test]
    fn drain_stops_at_zero() {
        let (monitor, _rx) = monitor(1);
        monitor.tick();
        assert_eq!(monitor.state().level, 0);
        monitor.tick();
        assert_eq!(monitor.state().level, 0);
    }

    #[test]
    fn drain_continues_from_an_override() {
        let (monitor, _rx) = monitor(100);
        monitor.set_level(50).unwrap();
        monitor.tick();
        assert_eq!(monitor.state().level, 49);
    }

    #[test]
    fn override_out_of_range_is_rejected() {
        let (monitor, _rx) = monitor(100);
        let err = monitor.set_level(101).unwrap_err();
        assert!(matches!(err, RelayError::BatteryLevelOutOfRange(101)));
        assert_eq!(monitor.state().level, 100);
    }

    #[test]
    fn watch_subscribers_observe_changes() {
        let (monitor, _rx) = monitor(100);
        let watch_rx = monitor.subscribe();
        monitor.set_level(10).unwrap();
        let state = *watch_rx.borrow();
        assert_eq!(state.level, 10);
        assert_eq!(state.mode, Mode::ReturnToBase);
    }
}
