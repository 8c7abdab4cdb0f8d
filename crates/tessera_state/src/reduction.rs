//! Reduction registry.
//!
//! Remote nodes push partial reduction results keyed by reduction id; the
//! node owning the reduction combines them once all partials arrived.
//! The transfer manager routes frames carrying a reduction id here
//! instead of the buffer store.

use std::collections::HashMap;
use std::sync::RwLock;
use tessera_core::{BufferId, NodeId, ReductionId};

/// One registered reduction: the target buffer and the partials received
#[derive(Debug, Clone)]
struct ReductionSlot {
    bid: BufferId,
    partials: Vec<(NodeId, Vec<u8>)>,
}

/// Registry of live reductions on this node
pub struct ReductionRegistry {
    reductions: RwLock<HashMap<ReductionId, ReductionSlot>>,
}

impl ReductionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            reductions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a reduction targeting `bid`
    pub fn register(&self, rid: ReductionId, bid: BufferId) {
        let mut reductions = self.reductions.write().expect("registry lock poisoned");
        reductions.insert(
            rid,
            ReductionSlot {
                bid,
                partials: Vec::new(),
            },
        );
    }

    /// Whether a reduction is known locally
    #[must_use]
    pub fn has_reduction(&self, rid: ReductionId) -> bool {
        self.reductions
            .read()
            .expect("registry lock poisoned")
            .contains_key(&rid)
    }

    /// Record a partial result received from `source`.
    ///
    /// Returns false if the reduction is unknown.
    pub fn push_partial(&self, rid: ReductionId, source: NodeId, bytes: Vec<u8>) -> bool {
        let mut reductions = self.reductions.write().expect("registry lock poisoned");
        match reductions.get_mut(&rid) {
            Some(slot) => {
                slot.partials.push((source, bytes));
                true
            }
            None => false,
        }
    }

    /// Take all partials received so far, in arrival order
    #[must_use]
    pub fn take_partials(&self, rid: ReductionId) -> Vec<(NodeId, Vec<u8>)> {
        let mut reductions = self.reductions.write().expect("registry lock poisoned");
        match reductions.get_mut(&rid) {
            Some(slot) => std::mem::take(&mut slot.partials),
            None => Vec::new(),
        }
    }

    /// Target buffer of a reduction
    #[must_use]
    pub fn target_buffer(&self, rid: ReductionId) -> Option<BufferId> {
        self.reductions
            .read()
            .expect("registry lock poisoned")
            .get(&rid)
            .map(|slot| slot.bid)
    }

    /// Drop a finished reduction
    pub fn unregister(&self, rid: ReductionId) {
        let mut reductions = self.reductions.write().expect("registry lock poisoned");
        reductions.remove(&rid);
    }
}

impl Default for ReductionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
