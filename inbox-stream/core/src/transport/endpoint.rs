//! Node WebSocket endpoint derivation
//!
//! Local nodes serve the WebSocket API one port above the HTTP API; remote
//! nodes serve it on the same port.

use url::Url;

use super::traits::TransportError;

const LOCAL_HOSTS: [&str; 3] = ["localhost", "0.0.0.0", "127.0.0.1"];

/// Derive the WebSocket URL from the node's HTTP address
///
/// # Errors
///
/// Returns `TransportError::InvalidAddress` if the address is not a URL with
/// a host.
pub fn node_ws_url(node_address: &str) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidAddress {
        address: node_address.to_string(),
        reason,
    };

    let url = Url::parse(node_address).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    // Explicit port only; the scheme default counts as "no port"
    let port = url.port().unwrap_or(0);

    if LOCAL_HOSTS.contains(&host) {
        let ws_port = u32::from(port) + 1;
        return Ok(format!("ws://{host}:{ws_port}/ws"));
    }

    if port == 0 {
        Ok(format!("ws://{host}/ws"))
    } else {
        Ok(format!("ws://{host}:{port}/ws"))
    }
}
