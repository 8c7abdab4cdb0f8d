//! The per-node runtime value.
//!
//! One `Runtime` exists per worker process and owns the node-local
//! collaborators: the buffer store and the reduction registry. It is an
//! explicitly constructed value handed around by reference; buffers
//! cannot be created without one.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::{CoreError, CoreResult, NodeId};
use tessera_state::{BufferStore, ReductionRegistry};

/// Runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker nodes in the run
    pub num_nodes: usize,
    /// The node running master-access tasks
    pub master_node: NodeId,
}

impl RuntimeConfig {
    /// Create a configuration for `num_nodes` workers
    #[must_use]
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            master_node: NodeId::from_raw(0),
        }
    }

    /// Set the master node
    #[must_use]
    pub fn with_master_node(mut self, master: NodeId) -> Self {
        self.master_node = master;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Node-local runtime state
pub struct Runtime {
    config: RuntimeConfig,
    local_node: NodeId,
    store: Arc<BufferStore>,
    reductions: Arc<ReductionRegistry>,
}

impl Runtime {
    /// Create the runtime for one worker node.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the configuration names no workers or the
    /// local rank is out of range.
    pub fn new(local_node: NodeId, config: RuntimeConfig) -> CoreResult<Self> {
        if config.num_nodes == 0 {
            return Err(CoreError::usage("a run needs at least one worker node"));
        }
        if local_node.as_index() >= config.num_nodes {
            return Err(CoreError::usage(format!(
                "{} is not a rank in 0..{}",
                local_node, config.num_nodes
            )));
        }
        if config.master_node.as_index() >= config.num_nodes {
            return Err(CoreError::usage(format!(
                "master {} is not a rank in 0..{}",
                config.master_node, config.num_nodes
            )));
        }
        Ok(Self {
            config,
            local_node,
            store: Arc::new(BufferStore::new()),
            reductions: Arc::new(ReductionRegistry::new()),
        })
    }

    /// The configuration
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// This node's rank
    #[must_use]
    pub const fn local_node(&self) -> NodeId {
        self.local_node
    }

    /// Number of worker nodes
    #[must_use]
    pub const fn num_nodes(&self) -> usize {
        self.config.num_nodes
    }

    /// The node-local buffer store
    #[must_use]
    pub fn store(&self) -> &Arc<BufferStore> {
        &self.store
    }

    /// The node-local reduction registry
    #[must_use]
    pub fn reductions(&self) -> &Arc<ReductionRegistry> {
        &self.reductions
    }
}
