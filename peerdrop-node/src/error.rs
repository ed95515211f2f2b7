//! Error taxonomy for transfers and node lifecycle

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use peerdrop_common::ErrorKind;
use peerdrop_common::types::InvalidTransition;
use thiserror::Error;

/// Failure of a connection, transfer or listener operation
#[derive(Debug, Error)]
pub enum TransferError {
    // Protocol errors
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("no {expected} from peer within {after:?}")]
    HandshakeTimeout {
        expected: &'static str,
        after: Duration,
    },

    #[error("expected {expected} from peer, got {received:?}")]
    HandshakeRejected {
        expected: &'static str,
        received: String,
    },

    #[error("stream error: {message}")]
    Stream {
        message: String,
        /// File left behind by an interrupted receive
        partial_file: Option<PathBuf>,
    },

    #[error("connection closed")]
    ConnectionClosed,

    // Policy errors
    #[error("file {file_name} rejected by node filter")]
    FilterRejected { file_name: String },

    // Lifecycle errors
    #[error("port {port} is unavailable: {reason}")]
    BindConflict { port: u16, reason: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl TransferError {
    /// Stream failure with no file left behind
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
            partial_file: None,
        }
    }

    /// Configuration failure
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Attach the path of a partially written file to a stream failure
    #[must_use]
    pub fn with_partial_file(self, path: &Path) -> Self {
        match self {
            Self::Stream { message, .. } => Self::Stream {
                message,
                partial_file: Some(path.to_path_buf()),
            },
            other => other,
        }
    }

    /// Partially written file the caller should delete, if any
    #[must_use]
    pub fn partial_file(&self) -> Option<&Path> {
        match self {
            Self::Stream { partial_file, .. } => partial_file.as_deref(),
            _ => None,
        }
    }

    /// Machine-readable kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect { .. } => ErrorKind::Connect,
            Self::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            Self::HandshakeRejected { .. } => ErrorKind::HandshakeRejected,
            Self::Stream { .. } => ErrorKind::Stream,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::FilterRejected { .. } => ErrorKind::FilterRejected,
            Self::BindConflict { .. } => ErrorKind::BindConflict,
            Self::Config { .. } => ErrorKind::Config,
            Self::NodeNotFound { .. } => ErrorKind::NodeNotFound,
            Self::SourceNotFound(_) => ErrorKind::SourceNotFound,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
        }
    }

    /// Whether the connection that produced this error must be dropped
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        self.kind().is_protocol_error()
    }
}
