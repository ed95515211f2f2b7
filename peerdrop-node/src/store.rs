//! Node configuration store

use std::sync::RwLock;

use peerdrop_common::types::NodeConfig;

use crate::error::TransferError;

/// Source of the node configurations this process serves
///
/// The engine reads the list when starting nodes; persistence is up to the
/// implementation.
pub trait NodeConfigStore: Send + Sync {
    /// Snapshot of all configurations in display order
    fn nodes(&self) -> Vec<NodeConfig>;

    /// Append a configuration
    fn add(&self, config: NodeConfig);

    /// Replace the configuration at `index`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `index` is out of range.
    fn update(&self, index: usize, config: NodeConfig) -> Result<(), TransferError>;

    /// Remove and return the configuration at `index`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `index` is out of range.
    fn remove(&self, index: usize) -> Result<NodeConfig, TransferError>;
}

/// Store that keeps configurations in memory only
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    nodes: RwLock<Vec<NodeConfig>>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new(nodes: Vec<NodeConfig>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }
}

fn out_of_range(index: usize, len: usize) -> TransferError {
    TransferError::config(format!("node index {index} out of range ({len} configured)"))
}

impl NodeConfigStore for MemoryConfigStore {
    fn nodes(&self) -> Vec<NodeConfig> {
        self.nodes.read().expect("config store lock poisoned").clone()
    }

    fn add(&self, config: NodeConfig) {
        self.nodes
            .write()
            .expect("config store lock poisoned")
            .push(config);
    }

    fn update(&self, index: usize, config: NodeConfig) -> Result<(), TransferError> {
        let mut nodes = self.nodes.write().expect("config store lock poisoned");
        let len = nodes.len();
        let slot = nodes.get_mut(index).ok_or_else(|| out_of_range(index, len))?;
        *slot = config;
        Ok(())
    }

    fn remove(&self, index: usize) -> Result<NodeConfig, TransferError> {
        let mut nodes = self.nodes.write().expect("config store lock poisoned");
        if index >= nodes.len() {
            return Err(out_of_range(index, nodes.len()));
        }
        Ok(nodes.remove(index))
    }
}
