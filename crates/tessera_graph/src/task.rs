//! Tasks: one submitted command group each.

use crate::mapper::RangeMapper;
use std::sync::Arc;
use tessera_core::{AccessMode, BufferId, TaskId};
use tessera_grid::Extent;

/// What kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Data-parallel kernel split across all worker nodes
    Compute,
    /// Host-side access running as a single chunk on the master node
    MasterAccess,
}

/// One buffer access declared by a task: mode plus the stored range mapper
#[derive(Clone)]
pub struct BufferRequirement {
    /// The accessed buffer
    pub bid: BufferId,
    /// How the buffer is accessed
    pub mode: AccessMode,
    /// Maps a kernel chunk to the buffer subregion it needs
    pub mapper: Arc<dyn RangeMapper>,
}

impl BufferRequirement {
    /// Create a requirement
    #[must_use]
    pub fn new(bid: BufferId, mode: AccessMode, mapper: Arc<dyn RangeMapper>) -> Self {
        Self { bid, mode, mapper }
    }
}

impl std::fmt::Debug for BufferRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferRequirement")
            .field("bid", &self.bid)
            .field("mode", &self.mode)
            .field("mapper_dims", &self.mapper.dimensions())
            .finish()
    }
}

/// One submitted command group, as captured by the pre-pass
#[derive(Debug, Clone)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Task kind
    pub kind: TaskKind,
    /// Global iteration space
    pub global_size: Extent,
    /// Debug label, shown in diagnostics
    pub label: String,
    /// Declared buffer accesses, in declaration order
    pub requirements: Vec<BufferRequirement>,
}

impl Task {
    /// Create a compute task
    #[must_use]
    pub fn compute(id: TaskId, global_size: Extent, label: impl Into<String>) -> Self {
        Self {
            id,
            kind: TaskKind::Compute,
            global_size,
            label: label.into(),
            requirements: Vec::new(),
        }
    }

    /// Create a master-access task
    #[must_use]
    pub fn master_access(id: TaskId, global_size: Extent, label: impl Into<String>) -> Self {
        Self {
            id,
            kind: TaskKind::MasterAccess,
            global_size,
            label: label.into(),
            requirements: Vec::new(),
        }
    }

    /// Append a buffer requirement
    pub fn add_requirement(&mut self, req: BufferRequirement) {
        self.requirements.push(req);
    }

    /// Builder-style requirement append
    #[must_use]
    pub fn with_requirement(mut self, req: BufferRequirement) -> Self {
        self.requirements.push(req);
        self
    }
}
