//! Orchestration of listeners and outbound connections
//!
//! The `ConnectionManager` owns every registry of the engine behind one
//! async mutex:
//! - listeners by port
//! - outbound connections by node id
//! - local nodes served by this process
//! - test and discovered peers
//!
//! Every check-then-act sequence runs under that lock, and callers only ever
//! receive copies. Outbound connects and sends run outside the lock on a
//! cloned `Arc<Connection>`, so `stop()` can close a connection while a
//! transfer is using it; the transfer then fails with `ConnectionClosed`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use peerdrop_common::types::{Node, NodeConfig, TransferRecord};
use peerdrop_common::validators::{NodeConfigError, validate_node_configs};
use peerdrop_common::{
    LOOPBACK_ADDRESS, MAX_TEST_NODES, TEST_PORT_RANGE, format_file_size, is_loopback_address,
};
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ManagerSettings;
use crate::connection::Connection;
use crate::error::TransferError;
use crate::history::TransferHistory;
use crate::listener::{ListenerContext, NodeListener};
use crate::loopback;
use crate::notifier::{Notification, Notifier};
use crate::observer::{NoopObserver, TransferObserver};
use crate::store::NodeConfigStore;

/// Outcome of starting one configured node
#[derive(Debug)]
pub struct NodeStartResult {
    pub config: NodeConfig,
    pub result: Result<Node, TransferError>,
}

#[derive(Default)]
struct ManagerState {
    listeners: BTreeMap<u16, NodeListener>,
    outbound: HashMap<String, Arc<Connection>>,
    local_nodes: HashMap<String, Node>,
    test_nodes: Vec<Node>,
    discovered_nodes: Vec<Node>,
}

/// Entry point of the transfer engine
pub struct ConnectionManager {
    config_store: Arc<dyn NodeConfigStore>,
    notifier: Arc<dyn Notifier>,
    history: Arc<dyn TransferHistory>,
    settings: ManagerSettings,
    state: Mutex<ManagerState>,
    started: AtomicBool,
}

impl ConnectionManager {
    /// Create a stopped manager with default settings
    pub fn new(
        config_store: Arc<dyn NodeConfigStore>,
        notifier: Arc<dyn Notifier>,
        history: Arc<dyn TransferHistory>,
    ) -> Self {
        Self::with_settings(config_store, notifier, history, ManagerSettings::default())
    }

    pub fn with_settings(
        config_store: Arc<dyn NodeConfigStore>,
        notifier: Arc<dyn Notifier>,
        history: Arc<dyn TransferHistory>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            config_store,
            notifier,
            history,
            settings,
            state: Mutex::new(ManagerState::default()),
            started: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the service: every enabled configured node, plus test peers in test mode
    ///
    /// A running service is stopped first. A node that fails to start is
    /// reported through the notifier and does not prevent the others from
    /// starting.
    pub async fn start(&self, test_mode: bool) -> Vec<NodeStartResult> {
        if self.is_started() {
            self.stop().await;
        }

        let mut state = self.state.lock().await;
        self.started.store(true, Ordering::Release);

        if test_mode {
            state.test_nodes = probe_test_nodes().await;
            info!(count = state.test_nodes.len(), "test mode enabled");
        }

        let configs = self.config_store.nodes();
        let mut duplicates: Vec<NodeConfigError> = validate_node_configs(&configs)
            .into_iter()
            .filter(|e| matches!(e, NodeConfigError::DuplicatePort { .. }))
            .collect();
        let mut claimed = HashSet::new();

        let mut results = Vec::new();
        for config in configs.into_iter().filter(|c| c.enabled) {
            let duplicate = if claimed.insert(config.port) {
                None
            } else {
                take_duplicate(&mut duplicates, &config)
            };
            let result = match duplicate {
                Some(e) => Err(TransferError::BindConflict {
                    port: config.port,
                    reason: e.to_string(),
                }),
                None => self.start_node_locked(&mut state, config.clone()).await,
            };
            if let Err(e) = &result {
                warn!(port = config.port, node = %config.name, error = %e, "node failed to start");
                self.notifier.notify(Notification::error(
                    "Node failed to start",
                    format!(
                        "{} ({}:{}) failed to start: {e}",
                        config.name, config.address, config.port
                    ),
                ));
            }
            results.push(NodeStartResult { config, result });
        }

        results
    }

    /// Serve one node configuration
    ///
    /// Starting a configuration that already runs is a no-op returning its node.
    ///
    /// # Errors
    ///
    /// Returns `BindConflict` if the port is served with a different
    /// configuration or taken by another process, `Config` if the
    /// configuration is disabled or invalid. No state is left behind on error.
    pub async fn start_node(&self, config: NodeConfig) -> Result<Node, TransferError> {
        let mut state = self.state.lock().await;
        self.start_node_locked(&mut state, config).await
    }

    async fn start_node_locked(
        &self,
        state: &mut ManagerState,
        config: NodeConfig,
    ) -> Result<Node, TransferError> {
        if !config.enabled {
            return Err(TransferError::config(format!(
                "node {} is disabled",
                config.name
            )));
        }

        if let Some(existing) = state.listeners.get(&config.port) {
            if existing.config() == &config {
                debug!(port = config.port, node = %config.name, "node already running");
                return Ok(existing.node());
            }
            return Err(TransferError::BindConflict {
                port: config.port,
                reason: format!("port already serves node {}", existing.config().name),
            });
        }

        let listener = NodeListener::bind(config, self.listener_context()).await?;
        let node = listener.node();
        state.local_nodes.insert(node.id.clone(), node.clone());
        state.listeners.insert(listener.port(), listener);
        Ok(node)
    }

    fn listener_context(&self) -> ListenerContext {
        ListenerContext::new(
            Arc::clone(&self.notifier),
            Arc::clone(&self.history),
            &self.settings,
        )
    }

    /// Stop serving `port`
    ///
    /// Returns false if no listener was bound to it.
    pub async fn stop_node(&self, port: u16) -> bool {
        let mut state = self.state.lock().await;
        let Some(listener) = state.listeners.remove(&port) else {
            return false;
        };
        state.local_nodes.retain(|_, node| node.port != port);
        listener.shutdown().await;
        true
    }

    /// Close every listener and connection
    ///
    /// In-flight sends and receives fail with `ConnectionClosed`. Safe to call
    /// when nothing is running.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.started.store(false, Ordering::Release);

        for (_, connection) in state.outbound.drain() {
            connection.close();
        }

        let listeners = std::mem::take(&mut state.listeners);
        for (_, listener) in listeners {
            listener.shutdown().await;
        }

        state.local_nodes.clear();
        state.test_nodes.clear();
        info!("all nodes stopped");
    }

    // =========================================================================
    // Node views
    // =========================================================================

    /// Nodes a file can be sent to
    ///
    /// Enabled configured nodes, plus test and discovered peers while the
    /// service is started. Entries are unique by `address:port`; earlier
    /// sources win.
    pub async fn available_nodes(&self) -> Vec<Node> {
        let configured = self
            .config_store
            .nodes()
            .into_iter()
            .filter(|config| config.enabled)
            .map(|config| config.node(true));

        let mut nodes: Vec<Node> = if self.is_started() {
            let state = self.state.lock().await;
            state
                .test_nodes
                .iter()
                .cloned()
                .chain(configured)
                .chain(state.discovered_nodes.iter().cloned())
                .collect()
        } else {
            configured.collect()
        };

        let mut seen = HashSet::new();
        nodes.retain(|node| seen.insert(node.endpoint()));
        nodes
    }

    /// Register a peer found outside the configuration
    ///
    /// Returns false if a peer with the same `address:port` is already known.
    pub async fn add_discovered_node(&self, node: Node) -> bool {
        let mut state = self.state.lock().await;
        let endpoint = node.endpoint();
        if state.discovered_nodes.iter().any(|n| n.endpoint() == endpoint) {
            return false;
        }
        debug!(peer = %endpoint, "discovered node");
        state.discovered_nodes.push(node);
        true
    }

    /// Peers with a live outbound connection
    pub async fn connected_nodes(&self) -> Vec<Node> {
        let state = self.state.lock().await;
        let mut nodes: Vec<Node> = state
            .outbound
            .values()
            .filter(|connection| !connection.is_closed())
            .map(|connection| connection.remote_node().clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Nodes served by this process, ordered by port
    pub async fn local_nodes(&self) -> Vec<Node> {
        let state = self.state.lock().await;
        let mut nodes: Vec<Node> = state.local_nodes.values().cloned().collect();
        nodes.sort_by_key(|node| node.port);
        nodes
    }

    /// The local node with the lowest port, if any
    pub async fn local_node(&self) -> Option<Node> {
        self.local_nodes().await.into_iter().next()
    }

    /// Ports with a running listener
    pub async fn listening_ports(&self) -> Vec<u16> {
        self.state.lock().await.listeners.keys().copied().collect()
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    /// Connection to `node`, opening it if needed
    ///
    /// Repeated calls return the same connection while it stays open. The
    /// socket is opened outside the manager lock, so a slow peer does not
    /// hold up work with other peers.
    ///
    /// # Errors
    ///
    /// Returns `Connect` if the peer is unreachable; nothing is cached then.
    pub async fn connect_to(&self, node: &Node) -> Result<Arc<Connection>, TransferError> {
        let connection = {
            let mut state = self.state.lock().await;
            let cached = state
                .outbound
                .get(&node.id)
                .filter(|existing| !existing.is_closed())
                .cloned();
            match cached {
                Some(existing) => existing,
                None => {
                    let connection = Arc::new(Connection::new(
                        node.clone(),
                        PathBuf::new(),
                        self.settings.timeouts,
                    ));
                    state
                        .outbound
                        .insert(node.id.clone(), Arc::clone(&connection));
                    connection
                }
            }
        };

        if let Err(e) = connection.connect().await {
            self.evict(&node.id, &connection).await;
            return Err(e);
        }
        Ok(connection)
    }

    /// Drop `connection` from the cache unless it was already replaced, then close it
    async fn evict(&self, node_id: &str, connection: &Arc<Connection>) {
        let mut state = self.state.lock().await;
        let cached = state
            .outbound
            .get(node_id)
            .is_some_and(|c| Arc::ptr_eq(c, connection));
        if cached {
            state.outbound.remove(node_id);
        }
        connection.close();
    }

    /// Send a file to an available node
    ///
    /// `node_id` is a node id or its `address:port`.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if no available node matches, `SourceNotFound`
    /// if `path` is not a file, otherwise the error that ended the transfer.
    pub async fn send_file(
        &self,
        node_id: &str,
        path: &Path,
    ) -> Result<TransferRecord, TransferError> {
        self.send_file_with_observer(node_id, path, Arc::new(NoopObserver))
            .await
    }

    /// Like [`send_file`](Self::send_file), reporting progress to `observer`
    ///
    /// # Errors
    ///
    /// Same as [`send_file`](Self::send_file).
    pub async fn send_file_with_observer(
        &self,
        node_id: &str,
        path: &Path,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferRecord, TransferError> {
        let result = self.dispatch(node_id, path, observer).await;

        match &result {
            Ok(record) => {
                self.history.record(record.clone());
                self.notifier.notify(Notification::info(
                    "File sent",
                    format!(
                        "Sent {} ({}) to {}",
                        record.file_name,
                        format_file_size(record.file_size),
                        node_id
                    ),
                ));
            }
            Err(e) => {
                warn!(peer = %node_id, kind = %e.kind(), error = %e, "send failed");
                self.notifier.notify(Notification::error(
                    "Transfer failed",
                    format!("Sending {} to {node_id} failed: {e}", path.display()),
                ));
            }
        }

        result
    }

    async fn dispatch(
        &self,
        node_id: &str,
        path: &Path,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferRecord, TransferError> {
        let node = self
            .available_nodes()
            .await
            .into_iter()
            .find(|node| node.id == node_id || node.endpoint() == node_id)
            .ok_or_else(|| TransferError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;

        match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => return Err(TransferError::SourceNotFound(path.to_path_buf())),
        }

        if self.settings.local_fast_path && is_loopback_address(&node.address) {
            return self.send_local(&node, path, observer).await;
        }
        self.send_remote(&node, path, observer).await
    }

    async fn send_local(
        &self,
        node: &Node,
        path: &Path,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferRecord, TransferError> {
        let config = self
            .config_store
            .nodes()
            .into_iter()
            .find(|config| config.port == node.port)
            .ok_or_else(|| {
                TransferError::config(format!(
                    "no local configuration for {LOOPBACK_ADDRESS}:{}",
                    node.port
                ))
            })?;

        debug!(port = node.port, file = %path.display(), "copying to local node");
        let result = loopback::copy_to_node(path, &config, observer.as_ref()).await;
        match &result {
            Ok(_) => observer.on_complete(),
            Err(e) => observer.on_error(&e.to_string()),
        }
        result
    }

    async fn send_remote(
        &self,
        node: &Node,
        path: &Path,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferRecord, TransferError> {
        let connection = match self.connect_to(node).await {
            Ok(connection) => connection,
            Err(e) => {
                observer.on_error(&e.to_string());
                return Err(e);
            }
        };

        let result = connection.send_file_observed(path, observer).await;

        if let Err(e) = &result {
            if e.is_protocol_error() {
                self.evict(&node.id, &connection).await;
            }
        }

        result
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &self.settings)
            .field("started", &self.is_started())
            .finish()
    }
}

/// Remove and return the duplicate-port error naming `config` as the later entry
fn take_duplicate(
    duplicates: &mut Vec<NodeConfigError>,
    config: &NodeConfig,
) -> Option<NodeConfigError> {
    let index = duplicates.iter().position(|e| {
        matches!(e, NodeConfigError::DuplicatePort { port, second, .. }
            if *port == config.port && *second == config.name)
    })?;
    Some(duplicates.remove(index))
}

/// Free loopback ports in the test range, as peer nodes
async fn probe_test_nodes() -> Vec<Node> {
    let mut nodes = Vec::new();
    for port in TEST_PORT_RANGE {
        if nodes.len() == MAX_TEST_NODES {
            break;
        }
        // Bound only long enough to prove the port is free
        if TcpListener::bind((LOOPBACK_ADDRESS, port)).await.is_err() {
            continue;
        }
        let index = nodes.len();
        nodes.push(Node {
            id: format!("test-node-{index}"),
            name: format!("Test node {}", index + 1),
            address: LOOPBACK_ADDRESS.to_string(),
            port,
            online: true,
        });
    }
    nodes
}
