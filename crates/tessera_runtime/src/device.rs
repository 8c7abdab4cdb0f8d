//! The device-compute collaborator boundary.
//!
//! The core never executes kernel bodies itself. Per COMPUTE command it
//! hands the collaborator a task id, the chunk, and the buffer accessor
//! bindings; the collaborator returns completion. [`HostDevice`] is the
//! host-side shim used by tests and simulations: it runs registered
//! kernel functions directly against the local buffer store.

use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{AccessMode, BufferId, CoreResult, NodeId, TaskId};
use tessera_grid::Subrange;
use tessera_state::BufferStore;

/// One accessor the kernel was declared with: which buffer, how, where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorBinding {
    /// The accessed buffer
    pub bid: BufferId,
    /// Access mode
    pub mode: AccessMode,
    /// The buffer subrange this chunk touches, clamped to the extent
    pub sr: Subrange,
}

/// Executes kernel chunks on behalf of the core.
pub trait DeviceCompute {
    /// Run one chunk of a task's kernel.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel fails.
    fn execute(
        &mut self,
        task: TaskId,
        label: &str,
        chunk: &Subrange,
        bindings: &[AccessorBinding],
    ) -> CoreResult<()>;
}

/// Everything a host kernel can see
pub struct HostKernelCtx<'a> {
    /// The executing node
    pub node: NodeId,
    /// The chunk being executed
    pub chunk: &'a Subrange,
    /// Declared accessor bindings, in declaration order
    pub bindings: &'a [AccessorBinding],
    /// The node-local buffer store
    pub store: &'a BufferStore,
}

/// A host kernel body
pub type HostKernel = Box<dyn Fn(&HostKernelCtx<'_>) -> CoreResult<()> + Send>;

/// Host-side device shim.
///
/// Kernels are registered by debug label. A COMPUTE for a label with no
/// registered kernel completes as a no-op, which keeps analysis-only
/// programs runnable.
pub struct HostDevice {
    node: NodeId,
    store: Arc<BufferStore>,
    kernels: HashMap<String, HostKernel>,
}

impl HostDevice {
    /// Create a shim bound to one node's store
    #[must_use]
    pub fn new(node: NodeId, store: Arc<BufferStore>) -> Self {
        Self {
            node,
            store,
            kernels: HashMap::new(),
        }
    }

    /// Register a kernel body under a debug label
    pub fn register_kernel(&mut self, label: impl Into<String>, kernel: HostKernel) {
        self.kernels.insert(label.into(), kernel);
    }

    /// Builder-style kernel registration
    #[must_use]
    pub fn with_kernel(mut self, label: impl Into<String>, kernel: HostKernel) -> Self {
        self.register_kernel(label, kernel);
        self
    }
}

impl DeviceCompute for HostDevice {
    fn execute(
        &mut self,
        _task: TaskId,
        label: &str,
        chunk: &Subrange,
        bindings: &[AccessorBinding],
    ) -> CoreResult<()> {
        let Some(kernel) = self.kernels.get(label) else {
            return Ok(());
        };
        let ctx = HostKernelCtx {
            node: self.node,
            chunk,
            bindings,
            store: &self.store,
        };
        kernel(&ctx)
    }
}
