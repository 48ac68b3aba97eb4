//! Small validation helpers used by the configuration layer and by runtime
//! reconfiguration requests.

use std::net::SocketAddr;

/// Validates that a port number is usable as a connect or rebind target.
/// By type, the port is already within the 0-65535 range; this rejects 0,
/// which is reserved.
///
/// # Returns
///
/// * `Ok(())` if the port is valid.
/// * `Err(&'static str)` if the port is invalid.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Parses a `host:port` string into a socket address, rejecting port 0.
/// Used for the collector target and for runtime reconfiguration input,
/// where an ephemeral port makes no sense.
pub fn parse_reconfig_addr(addr: &str) -> Result<SocketAddr, &'static str> {
    let parsed: SocketAddr = addr.parse().map_err(|_| "Invalid socket address")?;
    is_valid_port(parsed.port())?;
    Ok(parsed)
}

/// Validates that a threshold value is a usable finite number.
pub fn is_finite(value: f64) -> Result<(), &'static str> {
    if value.is_finite() {
        Ok(())
    } else {
        Err("Value must be a finite number")
    }
}
