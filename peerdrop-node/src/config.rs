//! Runtime settings for nodes and the connection manager
//!
//! Settings deserialize from JSON with every field optional; missing fields
//! take the protocol defaults from `peerdrop_common`.

use std::time::Duration;

use peerdrop_common::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_READ_TIMEOUT};
use serde::{Deserialize, Serialize};

/// Default ceiling of concurrent receives per listener
pub const DEFAULT_MAX_CONCURRENT_RECEIVES: usize = 64;

/// Default ceiling of concurrent receives from one peer IP per listener
pub const DEFAULT_MAX_RECEIVES_PER_IP: usize = 8;

/// Default number of transfer records kept by the in-memory history
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Timeouts applied by every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolTimeouts {
    /// Outbound TCP connect
    pub connect_ms: u64,
    /// Waiting for `ACCEPT` or `COMPLETE`
    pub handshake_ms: u64,
    /// Any single read while streaming file bytes
    pub read_ms: u64,
}

impl ProtocolTimeouts {
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    #[must_use]
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    #[must_use]
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }
}

impl Default for ProtocolTimeouts {
    fn default() -> Self {
        Self {
            connect_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            handshake_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            read_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Settings of a [`ConnectionManager`](crate::manager::ConnectionManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    pub timeouts: ProtocolTimeouts,
    /// Concurrent receives per listener (0 = unlimited)
    pub max_concurrent_receives: usize,
    /// Concurrent receives from one IP per listener (0 = unlimited)
    pub max_receives_per_ip: usize,
    /// Copy files directly when the target node is on this host
    pub local_fast_path: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            timeouts: ProtocolTimeouts::default(),
            max_concurrent_receives: DEFAULT_MAX_CONCURRENT_RECEIVES,
            max_receives_per_ip: DEFAULT_MAX_RECEIVES_PER_IP,
            local_fast_path: true,
        }
    }
}

impl ManagerSettings {
    /// Parse settings from a JSON document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or a field has the wrong type.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ManagerSettings::default();
        assert_eq!(settings.timeouts.connect(), Duration::from_secs(5));
        assert_eq!(settings.timeouts.handshake(), Duration::from_secs(5));
        assert_eq!(settings.timeouts.read(), Duration::from_secs(30));
        assert!(settings.local_fast_path);
        assert_eq!(settings.max_concurrent_receives, 64);
    }

    #[test]
    fn test_partial_json() {
        let settings = ManagerSettings::from_json(
            r#"{"timeouts": {"handshake_ms": 250}, "local_fast_path": false}"#,
        )
        .unwrap();
        assert_eq!(settings.timeouts.handshake(), Duration::from_millis(250));
        assert_eq!(settings.timeouts.connect(), Duration::from_secs(5));
        assert!(!settings.local_fast_path);
        assert_eq!(settings.max_receives_per_ip, DEFAULT_MAX_RECEIVES_PER_IP);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(
            ManagerSettings::from_json("{}").unwrap(),
            ManagerSettings::default()
        );
        assert!(ManagerSettings::from_json("{\"local_fast_path\": 3}").is_err());
    }
}
