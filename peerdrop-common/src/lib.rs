//! Peerdrop Common Library
//!
//! Wire codec, handshake message, value types and file filtering shared by
//! every peerdrop node.

mod error_kind;
pub mod filter;
pub mod types;
pub mod validators;
pub mod wire;

pub use error_kind::{
    ERROR_KIND_BIND_CONFLICT, ERROR_KIND_CONFIG, ERROR_KIND_CONNECT, ERROR_KIND_CONNECTION_CLOSED,
    ERROR_KIND_FILTER_REJECTED, ERROR_KIND_HANDSHAKE_REJECTED, ERROR_KIND_HANDSHAKE_TIMEOUT,
    ERROR_KIND_INVALID_TRANSITION, ERROR_KIND_NODE_NOT_FOUND, ERROR_KIND_SOURCE_NOT_FOUND,
    ERROR_KIND_STREAM, ErrorKind,
};

use std::time::Duration;

/// Size of each file chunk written to or read from the stream (8 KiB)
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Time allowed for an outbound TCP connect
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the peer to answer with `ACCEPT` or `COMPLETE`
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket read timeout while streaming file bytes
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Ports probed when test mode is enabled
pub const TEST_PORT_RANGE: std::ops::RangeInclusive<u16> = 8001..=8010;

/// Maximum number of test nodes registered in test mode
pub const MAX_TEST_NODES: usize = 4;

/// Default include pattern for a new node configuration (accepts everything)
pub const DEFAULT_FILE_PATTERN: &str = "**/*";

/// Loopback host names that select the local fast path
pub const LOOPBACK_HOSTS: &[&str] = &["127.0.0.1", "localhost", "::1"];

/// Address reported as `from_address` for loopback transfers
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Returns true if `address` names this host
#[must_use]
pub fn is_loopback_address(address: &str) -> bool {
    let address = address.trim();
    if LOOPBACK_HOSTS
        .iter()
        .any(|host| host.eq_ignore_ascii_case(address))
    {
        return true;
    }
    address
        .parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Canonical node identifier for an address/port pair
#[must_use]
pub fn node_id(address: &str, port: u16) -> String {
    format!("{address}:{port}")
}

/// Human-readable size used in notification text (e.g. "120.56 KB")
#[must_use]
pub fn format_file_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
