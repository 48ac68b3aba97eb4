//! Custom error types for the relay.
//!
//! This module defines the primary error type, `RelayError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures the relay is
//! designed to survive:
//!
//! - **`Config`**: Wraps errors from the `figment` crate, typically file
//!   parsing or format issues in the configuration sources.
//! - **`ConfigValidation`**: Semantic errors in the configuration or in a
//!   runtime reconfiguration request - values that parse but are logically
//!   invalid (an out-of-range port, a zero buffer capacity). These are
//!   rejected before taking effect; the prior configuration remains live.
//! - **`Io`**: Wraps `std::io::Error`, covering all socket I/O on both the
//!   ingestion and forwarding paths.
//! - **`Decode`**: A malformed inbound JSON frame. Never fatal to a
//!   connection - the receive loop logs it and continues.
//! - **`Timeout`**: A bounded network operation expired. The forwarding path
//!   treats this identically to a connection error (enqueue and retry).
//!
//! By using `#[from]`, `RelayError` can be seamlessly created from underlying
//! error types with the `?` operator. Nothing in this taxonomy is fatal to
//! the process: the relay degrades to queuing rather than stopping.

use thiserror::Error;

/// Convenience alias for results using the relay error type.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// The central error type for the relay core.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    /// Socket or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON frame on the wire.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A bounded network operation did not complete in time.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Manual battery override outside the 0-100 range.
    #[error("Battery level {0} is out of range (0-100)")]
    BatteryLevelOutOfRange(u8),

    /// The relay command channel is gone; the relay has shut down.
    #[error("Relay command channel closed")]
    CommandChannelClosed,
}
