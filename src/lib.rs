//! # Drone Relay Core Library
//!
//! This crate implements the relay node of a three-tier sensor telemetry
//! network: leaf sensors push JSON readings over TCP, the relay keeps a
//! bounded per-sensor history, periodically computes averages and anomaly
//! alerts, and forwards the resulting batches to a central collector. When
//! the simulated battery drops into return-to-base mode, or the collector is
//! unreachable, batches are queued locally and flushed later in strict FIFO
//! order.
//!
//! ## Crate Structure
//!
//! - **`app`**: The `RelayApp` context that owns the shared state, spawns the
//!   background tasks, and services runtime control commands.
//! - **`aggregator`**: The periodic aggregation cycle - buffer snapshot,
//!   per-source averages, anomaly detection with deduplication.
//! - **`buffer`**: The `BufferStore`, a bounded most-recent-N ring of
//!   readings per sensor with consistent snapshot semantics.
//! - **`config`**: Strongly-typed configuration loaded from TOML files and
//!   `DRONE_RELAY_`-prefixed environment variables.
//! - **`error`**: The central `RelayError` enum and `RelayResult` alias.
//! - **`events`**: The observation interface - a broadcast stream of relay
//!   events any presentation layer can subscribe to.
//! - **`forwarder`**: The delivery path to the collector, including the
//!   outgoing queue, the mode gate, and the periodic drain task.
//! - **`listener`**: The TCP ingestion listener with one task per sensor
//!   connection and runtime rebind support.
//! - **`logging`**: Structured tracing initialization.
//! - **`messages`**: Command types for runtime control of a running relay.
//! - **`power`**: The battery drain simulation and Normal/ReturnToBase mode
//!   controller.
//! - **`protocol`**: Wire types and newline-delimited JSON framing shared
//!   with sensors and the collector.
//! - **`validation`**: Small validation helpers used by the configuration
//!   layer.

pub mod aggregator;
pub mod app;
pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod forwarder;
pub mod listener;
pub mod logging;
pub mod messages;
pub mod power;
pub mod protocol;
pub mod validation;
