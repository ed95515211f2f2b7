//! Registry of inbound connections being served by a listener
//!
//! Lets a listener close every in-flight receive when it shuts down. Each
//! receive task holds an [`InboundGuard`] that unregisters its connection
//! when the task ends, however it ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::connection::Connection;

/// Identifier of an inbound connection, unique per listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InboundId(u64);

impl InboundId {
    /// Synthetic node id for the peer behind this connection
    #[must_use]
    pub fn node_id(&self) -> String {
        format!("inbound-{}", self.0)
    }
}

impl std::fmt::Display for InboundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-flight inbound connections of one listener
pub struct InboundRegistry {
    connections: Mutex<HashMap<InboundId, Arc<Connection>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl InboundRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Build and register a connection under a fresh id
    ///
    /// After [`close_all`](Self::close_all) the connection is closed before
    /// it is returned, so its receive fails immediately.
    pub fn register<F>(&self, build: F) -> (InboundId, Arc<Connection>)
    where
        F: FnOnce(InboundId) -> Connection,
    {
        let id = InboundId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(build(id));

        let mut connections = self
            .connections
            .lock()
            .expect("inbound registry lock poisoned");
        if self.closed.load(Ordering::Acquire) {
            connection.close();
        } else {
            connections.insert(id, Arc::clone(&connection));
        }

        (id, connection)
    }

    /// Remove a connection once its task is done
    pub fn unregister(&self, id: InboundId) {
        self.connections
            .lock()
            .expect("inbound registry lock poisoned")
            .remove(&id);
    }

    /// Close every registered connection and refuse new ones
    ///
    /// Returns the number of connections that were closed.
    pub fn close_all(&self) -> usize {
        let connections: Vec<_> = {
            let mut connections = self
                .connections
                .lock()
                .expect("inbound registry lock poisoned");
            self.closed.store(true, Ordering::Release);
            connections.drain().map(|(_, c)| c).collect()
        };

        for connection in &connections {
            connection.close();
        }
        connections.len()
    }

    /// Number of registered connections
    pub fn active_count(&self) -> usize {
        self.connections
            .lock()
            .expect("inbound registry lock poisoned")
            .len()
    }
}

impl Default for InboundRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters an inbound connection when dropped
pub struct InboundGuard {
    registry: Arc<InboundRegistry>,
    id: InboundId,
}

impl InboundGuard {
    pub fn new(registry: Arc<InboundRegistry>, id: InboundId) -> Self {
        Self { registry, id }
    }
}

impl Drop for InboundGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
