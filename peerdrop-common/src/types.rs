//! Node and transfer value types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DEFAULT_FILE_PATTERN, ErrorKind, node_id};

/// Persisted configuration of one local node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Directory that receives files sent to this node
    pub target_directory: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Apply include/exclude rules to received files
    #[serde(default)]
    pub auto_accept: bool,
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_file_patterns() -> Vec<String> {
    vec![DEFAULT_FILE_PATTERN.to_string()]
}

impl NodeConfig {
    /// Create an enabled configuration that accepts every file
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        target_directory: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            target_directory: target_directory.into(),
            enabled: default_enabled(),
            auto_accept: false,
            file_patterns: default_file_patterns(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Identifier of the node this configuration describes
    #[must_use]
    pub fn id(&self) -> String {
        node_id(&self.address, self.port)
    }

    /// Ephemeral view of this configuration
    #[must_use]
    pub fn node(&self, online: bool) -> Node {
        Node {
            id: self.id(),
            name: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
            online,
        }
    }
}

/// A peer or local endpoint as shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub online: bool,
}

impl Node {
    /// Create a node whose id is derived from its address and port
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        Self {
            id: node_id(&address, port),
            name: name.into(),
            address,
            port,
            online: true,
        }
    }

    /// Key used to de-duplicate node lists
    #[must_use]
    pub fn endpoint(&self) -> String {
        node_id(&self.address, self.port)
    }
}

/// Lifecycle state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Failed,
}

impl TransferStatus {
    /// Whether no further transition is allowed
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub fn can_advance_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::Failed)
                | (Self::Accepted, Self::Completed)
                | (Self::Accepted, Self::Failed)
        )
    }

    /// Stable uppercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted transition out of a terminal or unrelated state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: TransferStatus,
    pub to: TransferStatus,
}

impl InvalidTransition {
    /// Error kind reported for this failure
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidTransition
    }
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transfer transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Immutable description of one transfer
///
/// State changes produce a new record through [`advance`](Self::advance); a
/// record never changes in place, so copies handed to history sinks stay
/// accurate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: String,
    pub from_address: String,
    pub to_address: String,
    pub file_name: String,
    pub file_size: u64,
    pub timestamp: DateTime<Utc>,
    pub status: TransferStatus,
}

impl TransferRecord {
    /// Create a `PENDING` record with a fresh id
    pub fn pending(
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self::with_id(
            Uuid::new_v4().to_string(),
            from_address,
            to_address,
            file_name,
            file_size,
        )
    }

    /// Create a `PENDING` record for a transfer id chosen by a peer
    pub fn with_id(
        id: impl Into<String>,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            from_address: from_address.into(),
            to_address: to_address.into(),
            file_name: file_name.into(),
            file_size,
            timestamp: Utc::now(),
            status: TransferStatus::Pending,
        }
    }

    /// Produce the record in state `next`
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the current status cannot move to `next`.
    pub fn advance(&self, next: TransferStatus) -> Result<Self, InvalidTransition> {
        if !self.status.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        Ok(Self {
            status: next,
            ..self.clone()
        })
    }
}
