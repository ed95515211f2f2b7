//! Peerdrop Node Library
//!
//! Transfer engine of a peerdrop node: TCP listeners for locally configured
//! nodes, outbound connections to peers, the whole-file transfer protocol and
//! the local fast path for nodes served by this process.
//!
//! Collaborators are injected as trait objects:
//! - [`NodeConfigStore`] supplies node configurations
//! - [`Notifier`] surfaces outcomes to the user
//! - [`TransferHistory`] records completed transfers
//! - [`TransferObserver`] follows the progress of one transfer

pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod listener;
pub mod loopback;
pub mod manager;
pub mod notifier;
pub mod observer;
pub mod store;

pub use config::{ManagerSettings, ProtocolTimeouts};
pub use connection::Connection;
pub use error::TransferError;
pub use history::{MemoryHistory, TransferHistory};
pub use listener::{ListenerContext, NodeListener, ReceiveOutcome};
pub use manager::{ConnectionManager, NodeStartResult};
pub use notifier::{Notification, NotificationLevel, Notifier, TracingNotifier};
pub use observer::{NoopObserver, TransferObserver};
pub use store::{MemoryConfigStore, NodeConfigStore};
