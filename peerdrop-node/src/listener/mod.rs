//! Per-node TCP listener
//!
//! A `NodeListener` binds the port of one node configuration and serves
//! every accepted socket on its own task: receive the file, apply the node's
//! include/exclude rules, report the outcome. Concurrency is capped by a
//! [`ReceiveTracker`]; connections over the cap are dropped on accept.

mod receive;
mod registry;
mod tracker;

pub use receive::ReceiveOutcome;
pub use registry::{InboundGuard, InboundId, InboundRegistry};
pub use tracker::{ReceiveGuard, ReceiveTracker};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use peerdrop_common::types::{Node, NodeConfig};
use peerdrop_common::validators::validate_node_config;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ManagerSettings, ProtocolTimeouts};
use crate::connection::Connection;
use crate::error::TransferError;
use crate::history::TransferHistory;
use crate::notifier::Notifier;

/// Bind address of every listener
pub const LISTEN_ADDRESS: &str = "0.0.0.0";

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Collaborators and limits shared by every receive of a listener
#[derive(Clone)]
pub struct ListenerContext {
    pub notifier: Arc<dyn Notifier>,
    pub history: Arc<dyn TransferHistory>,
    pub timeouts: ProtocolTimeouts,
    /// Concurrent receives per listener (0 = unlimited)
    pub max_concurrent_receives: usize,
    /// Concurrent receives from one IP (0 = unlimited)
    pub max_receives_per_ip: usize,
}

impl ListenerContext {
    /// Context using the limits and timeouts of `settings`
    pub fn new(
        notifier: Arc<dyn Notifier>,
        history: Arc<dyn TransferHistory>,
        settings: &ManagerSettings,
    ) -> Self {
        Self {
            notifier,
            history,
            timeouts: settings.timeouts,
            max_concurrent_receives: settings.max_concurrent_receives,
            max_receives_per_ip: settings.max_receives_per_ip,
        }
    }
}

/// A bound port serving one node configuration
pub struct NodeListener {
    config: Arc<NodeConfig>,
    local_addr: SocketAddr,
    tracker: Arc<ReceiveTracker>,
    registry: Arc<InboundRegistry>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl NodeListener {
    /// Bind `config.port` and start accepting
    ///
    /// # Errors
    ///
    /// Returns `BindConflict` if the port is taken, or `Config` if the
    /// configuration is invalid or the port cannot be bound for another reason.
    pub async fn bind(config: NodeConfig, ctx: ListenerContext) -> Result<Self, TransferError> {
        validate_node_config(&config).map_err(|e| TransferError::config(e.to_string()))?;

        let listener = TcpListener::bind((LISTEN_ADDRESS, config.port))
            .await
            .map_err(|e| bind_error(config.port, e))?;
        let local_addr = listener.local_addr().map_err(|e| bind_error(config.port, e))?;

        let config = Arc::new(config);
        let tracker = Arc::new(ReceiveTracker::new(
            ctx.max_concurrent_receives,
            ctx.max_receives_per_ip,
        ));
        let registry = Arc::new(InboundRegistry::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&config),
            Arc::new(ctx),
            Arc::clone(&tracker),
            Arc::clone(&registry),
            shutdown_rx,
        ));

        info!(port = config.port, node = %config.name, "listening");

        Ok(Self {
            config,
            local_addr,
            tracker,
            registry,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Node view of the served configuration
    pub fn node(&self) -> Node {
        self.config.node(true)
    }

    /// Number of receives currently in progress
    pub fn active_receives(&self) -> usize {
        self.tracker.active()
    }

    /// Stop accepting, release the port and close in-flight receives
    ///
    /// The port is free again once this returns.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(port = self.config.port, error = %e, "accept task ended abnormally");
            }
        }
        let closed = self.registry.close_all();
        info!(port = self.config.port, closed, "listener stopped");
    }
}

impl Drop for NodeListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            self.registry.close_all();
        }
    }
}

impl std::fmt::Debug for NodeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeListener")
            .field("node", &self.config.name)
            .field("local_addr", &self.local_addr)
            .field("active_receives", &self.active_receives())
            .finish()
    }
}

fn bind_error(port: u16, err: io::Error) -> TransferError {
    if err.kind() == io::ErrorKind::AddrInUse {
        TransferError::BindConflict {
            port,
            reason: err.to_string(),
        }
    } else {
        TransferError::config(format!("cannot listen on port {port}: {err}"))
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<NodeConfig>,
    ctx: Arc<ListenerContext>,
    tracker: Arc<ReceiveTracker>,
    registry: Arc<InboundRegistry>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer_addr)) => {
                    // Check the receive limits before doing any work
                    let Some(slot) = tracker.try_acquire(peer_addr.ip()) else {
                        debug!(port = config.port, peer = %peer_addr, "receive limit reached, dropping connection");
                        continue;
                    };

                    let (id, connection) = registry.register(|id| {
                        inbound_connection(socket, peer_addr, id, &config, ctx.timeouts)
                    });
                    let guard = InboundGuard::new(Arc::clone(&registry), id);
                    let config = Arc::clone(&config);
                    let ctx = Arc::clone(&ctx);

                    debug!(port = config.port, peer = %peer_addr, inbound = %id, "accepted connection");

                    tokio::spawn(async move {
                        // Held until the receive ends
                        let _slot = slot;
                        let _guard = guard;
                        let _ = receive::handle_inbound(connection, &config, &ctx).await;
                    });
                }
                Err(e) => {
                    warn!(port = config.port, error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

fn inbound_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    id: InboundId,
    config: &NodeConfig,
    timeouts: ProtocolTimeouts,
) -> Connection {
    let address = peer_addr.ip().to_string();
    let remote_node = Node {
        id: id.node_id(),
        name: address.clone(),
        address,
        port: peer_addr.port(),
        online: true,
    };
    Connection::from_stream(socket, remote_node, &config.target_directory, timeouts)
}
