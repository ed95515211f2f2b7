//! Machine-readable error kinds for transfer failures
//!
//! These strings are stable across releases so history sinks and
//! notification layers can branch on them without parsing messages.

use std::fmt;

/// TCP connect failed or timed out
pub const ERROR_KIND_CONNECT: &str = "connect";

/// Peer did not answer with a handshake token in time
pub const ERROR_KIND_HANDSHAKE_TIMEOUT: &str = "handshake_timeout";

/// Peer answered with an unexpected token
pub const ERROR_KIND_HANDSHAKE_REJECTED: &str = "handshake_rejected";

/// I/O failure while streaming file bytes
pub const ERROR_KIND_STREAM: &str = "stream";

/// Received file did not pass the node's include/exclude rules
pub const ERROR_KIND_FILTER_REJECTED: &str = "filter_rejected";

/// Listener port already in use
pub const ERROR_KIND_BIND_CONFLICT: &str = "bind_conflict";

/// Missing or unusable target directory, invalid node configuration
pub const ERROR_KIND_CONFIG: &str = "config";

/// Connection was closed locally while an operation was in flight
pub const ERROR_KIND_CONNECTION_CLOSED: &str = "connection_closed";

/// Requested node id is not among the available nodes
pub const ERROR_KIND_NODE_NOT_FOUND: &str = "node_not_found";

/// Source file to send does not exist
pub const ERROR_KIND_SOURCE_NOT_FOUND: &str = "source_not_found";

/// Illegal transfer status transition
pub const ERROR_KIND_INVALID_TRANSITION: &str = "invalid_transition";

/// Error kind of a transfer failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connect,
    HandshakeTimeout,
    HandshakeRejected,
    Stream,
    FilterRejected,
    BindConflict,
    Config,
    ConnectionClosed,
    NodeNotFound,
    SourceNotFound,
    InvalidTransition,
}

impl ErrorKind {
    /// Convert to the stable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => ERROR_KIND_CONNECT,
            Self::HandshakeTimeout => ERROR_KIND_HANDSHAKE_TIMEOUT,
            Self::HandshakeRejected => ERROR_KIND_HANDSHAKE_REJECTED,
            Self::Stream => ERROR_KIND_STREAM,
            Self::FilterRejected => ERROR_KIND_FILTER_REJECTED,
            Self::BindConflict => ERROR_KIND_BIND_CONFLICT,
            Self::Config => ERROR_KIND_CONFIG,
            Self::ConnectionClosed => ERROR_KIND_CONNECTION_CLOSED,
            Self::NodeNotFound => ERROR_KIND_NODE_NOT_FOUND,
            Self::SourceNotFound => ERROR_KIND_SOURCE_NOT_FOUND,
            Self::InvalidTransition => ERROR_KIND_INVALID_TRANSITION,
        }
    }

    /// Parse from the string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ERROR_KIND_CONNECT => Some(Self::Connect),
            ERROR_KIND_HANDSHAKE_TIMEOUT => Some(Self::HandshakeTimeout),
            ERROR_KIND_HANDSHAKE_REJECTED => Some(Self::HandshakeRejected),
            ERROR_KIND_STREAM => Some(Self::Stream),
            ERROR_KIND_FILTER_REJECTED => Some(Self::FilterRejected),
            ERROR_KIND_BIND_CONFLICT => Some(Self::BindConflict),
            ERROR_KIND_CONFIG => Some(Self::Config),
            ERROR_KIND_CONNECTION_CLOSED => Some(Self::ConnectionClosed),
            ERROR_KIND_NODE_NOT_FOUND => Some(Self::NodeNotFound),
            ERROR_KIND_SOURCE_NOT_FOUND => Some(Self::SourceNotFound),
            ERROR_KIND_INVALID_TRANSITION => Some(Self::InvalidTransition),
            _ => None,
        }
    }

    /// Whether this kind is a protocol-level failure that closes the connection
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Connect
                | Self::HandshakeTimeout
                | Self::HandshakeRejected
                | Self::Stream
                | Self::ConnectionClosed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
