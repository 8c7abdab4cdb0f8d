//! User-facing buffer handles.
//!
//! A buffer exists from registration to unregistration. Handles are
//! cheaply cloneable; the backing registration is dropped when the last
//! handle goes away.

use crate::handler::Handler;
use std::sync::Arc;
use tessera_core::{AccessMode, BufferId, CoreResult};
use tessera_graph::RangeMapper;
use tessera_grid::Extent;
use tessera_state::BufferStore;

/// Unregisters the buffer when the last handle drops.
struct LifetimeTracker {
    store: Arc<BufferStore>,
    bid: BufferId,
}

impl Drop for LifetimeTracker {
    fn drop(&mut self) {
        // the store may already be torn down at process exit
        let _ = self.store.unregister_buffer(self.bid);
    }
}

/// A ref-counted handle to a registered buffer
#[derive(Clone)]
pub struct BufferHandle {
    bid: BufferId,
    extent: Extent,
    elem_size: usize,
    tracker: Arc<LifetimeTracker>,
}

impl BufferHandle {
    pub(crate) fn new(
        bid: BufferId,
        extent: Extent,
        elem_size: usize,
        store: Arc<BufferStore>,
    ) -> Self {
        Self {
            bid,
            extent,
            elem_size,
            tracker: Arc::new(LifetimeTracker { store, bid }),
        }
    }

    /// The buffer id
    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.bid
    }

    /// The buffer extent
    #[must_use]
    pub const fn extent(&self) -> &Extent {
        &self.extent
    }

    /// Bytes per element
    #[must_use]
    pub const fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Declare an access to this buffer on the given handler.
    ///
    /// During the pre-pass this records `(buffer, mode, mapper)`; during
    /// execution it resolves the accessor binding for the current chunk.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the mapper's dimensionality does not
    /// match this buffer's.
    pub fn get_access(
        &self,
        handler: &mut Handler<'_>,
        mode: AccessMode,
        mapper: Arc<dyn RangeMapper>,
    ) -> CoreResult<()> {
        handler.require(self.bid, self.extent, mode, mapper)
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("bid", &self.bid)
            .field("extent", &self.extent)
            .field("elem_size", &self.elem_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifetime_unregisters_on_last_drop() {
        let store = Arc::new(BufferStore::new());
        let bid = BufferId::from_raw(0);
        store.register_buffer(bid, Extent::d1(4), 1, None).unwrap();

        let handle = BufferHandle::new(bid, Extent::d1(4), 1, Arc::clone(&store));
        let clone = handle.clone();
        drop(handle);
        assert!(store.has_buffer(bid));

        drop(clone);
        assert!(!store.has_buffer(bid));
    }

    #[test]
    fn test_accessors() {
        let store = Arc::new(BufferStore::new());
        let handle = BufferHandle::new(BufferId::from_raw(3), Extent::d2(4, 4), 8, store);
        assert_eq!(handle.id(), BufferId::from_raw(3));
        assert_eq!(handle.extent().dims(), 2);
        assert_eq!(handle.elem_size(), 8);
    }
}
