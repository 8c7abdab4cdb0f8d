//! Local buffer byte store.
//!
//! Holds the bytes this node has for each registered buffer, row-major.
//! The transfer manager commits inbound frames here and reads outbound
//! payloads from here; compute completion writes results here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tessera_core::{BufferId, CoreError};
use tessera_grid::Extent;

/// Store error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Buffer not registered
    NotFound {
        /// The missing buffer
        bid: BufferId,
    },
    /// Buffer already registered
    AlreadyRegistered {
        /// The duplicate buffer
        bid: BufferId,
    },
    /// Access reaches past the buffer extent
    OutOfBounds {
        /// The buffer accessed
        bid: BufferId,
        /// Access origin
        offset: [u64; 3],
        /// Access extents
        range: [u64; 3],
    },
    /// Provided bytes do not match the declared size
    SizeMismatch {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { bid } => write!(f, "Buffer not registered: {}", bid),
            Self::AlreadyRegistered { bid } => {
                write!(f, "Buffer already registered: {}", bid)
            }
            Self::OutOfBounds { bid, offset, range } => write!(
                f,
                "Access out of bounds on {}: offset {:?} range {:?}",
                bid, offset, range
            ),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "Size mismatch: expected {} bytes, got {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { bid } => CoreError::NotFound {
                kind: "Buffer".to_string(),
                id: bid.to_string(),
            },
            StoreError::AlreadyRegistered { bid } => CoreError::AlreadyExists {
                kind: "Buffer".to_string(),
                id: bid.to_string(),
            },
            other => CoreError::usage(other.to_string()),
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of registered buffers
    pub buffer_count: usize,
    /// Total bytes held
    pub total_bytes: u64,
    /// Number of reads served
    pub read_count: u64,
    /// Number of writes applied
    pub write_count: u64,
}

struct StoredBuffer {
    extent: Extent,
    elem_size: usize,
    data: Vec<u8>,
}

impl StoredBuffer {
    fn byte_index(&self, point: [u64; 3]) -> usize {
        let [_, sy, sz] = self.extent.sizes();
        (((point[0] * sy + point[1]) * sz + point[2]) as usize) * self.elem_size
    }

    fn in_bounds(&self, offset: [u64; 3], range: [u64; 3]) -> bool {
        let sizes = self.extent.sizes();
        (0..3).all(|d| offset[d].saturating_add(range[d]) <= sizes[d])
    }
}

/// The local buffer byte store.
///
/// Interior locking so the executor and the transfer manager can share
/// one store behind an `Arc`. All mutation happens on the owning node's
/// single thread; the lock serializes nothing in practice.
pub struct BufferStore {
    buffers: RwLock<HashMap<BufferId, StoredBuffer>>,
    stats: RwLock<StoreStats>,
}

impl BufferStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            stats: RwLock::new(StoreStats::default()),
        }
    }

    /// Register a buffer, optionally seeding it with host bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is already registered or the host
    /// bytes do not match `extent.len() * elem_size`.
    pub fn register_buffer(
        &self,
        bid: BufferId,
        extent: Extent,
        elem_size: usize,
        host_init: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        let total = (extent.len() as usize) * elem_size;
        let data = match host_init {
            Some(bytes) => {
                if bytes.len() != total {
                    return Err(StoreError::SizeMismatch {
                        expected: total,
                        actual: bytes.len(),
                    });
                }
                bytes.to_vec()
            }
            None => vec![0u8; total],
        };

        let mut buffers = self.buffers.write().expect("store lock poisoned");
        if buffers.contains_key(&bid) {
            return Err(StoreError::AlreadyRegistered { bid });
        }
        buffers.insert(
            bid,
            StoredBuffer {
                extent,
                elem_size,
                data,
            },
        );

        let mut stats = self.stats.write().expect("store lock poisoned");
        stats.buffer_count += 1;
        stats.total_bytes += total as u64;
        Ok(())
    }

    /// Remove a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not registered.
    pub fn unregister_buffer(&self, bid: BufferId) -> Result<(), StoreError> {
        let mut buffers = self.buffers.write().expect("store lock poisoned");
        let removed = buffers.remove(&bid).ok_or(StoreError::NotFound { bid })?;

        let mut stats = self.stats.write().expect("store lock poisoned");
        stats.buffer_count -= 1;
        stats.total_bytes -= removed.data.len() as u64;
        Ok(())
    }

    /// Whether a buffer is registered
    #[must_use]
    pub fn has_buffer(&self, bid: BufferId) -> bool {
        self.buffers
            .read()
            .expect("store lock poisoned")
            .contains_key(&bid)
    }

    /// Element size of a registered buffer
    pub fn elem_size(&self, bid: BufferId) -> Result<usize, StoreError> {
        let buffers = self.buffers.read().expect("store lock poisoned");
        buffers
            .get(&bid)
            .map(|b| b.elem_size)
            .ok_or(StoreError::NotFound { bid })
    }

    /// Read a row-major window of a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is unknown or the window reaches
    /// past its extent.
    pub fn get_buffer_data(
        &self,
        bid: BufferId,
        offset: [u64; 3],
        range: [u64; 3],
    ) -> Result<Vec<u8>, StoreError> {
        let buffers = self.buffers.read().expect("store lock poisoned");
        let buf = buffers.get(&bid).ok_or(StoreError::NotFound { bid })?;
        if !buf.in_bounds(offset, range) {
            return Err(StoreError::OutOfBounds { bid, offset, range });
        }

        let row_bytes = (range[2] as usize) * buf.elem_size;
        let mut out = Vec::with_capacity(
            (range[0] * range[1]) as usize * row_bytes,
        );
        for x in offset[0]..offset[0] + range[0] {
            for y in offset[1]..offset[1] + range[1] {
                let start = buf.byte_index([x, y, offset[2]]);
                out.extend_from_slice(&buf.data[start..start + row_bytes]);
            }
        }

        self.stats.write().expect("store lock poisoned").read_count += 1;
        Ok(out)
    }

    /// Write a row-major window of a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is unknown, the window reaches past
    /// its extent, or `bytes` does not match the window size.
    pub fn set_buffer_data(
        &self,
        bid: BufferId,
        offset: [u64; 3],
        range: [u64; 3],
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let mut buffers = self.buffers.write().expect("store lock poisoned");
        let buf = buffers.get_mut(&bid).ok_or(StoreError::NotFound { bid })?;
        if !buf.in_bounds(offset, range) {
            return Err(StoreError::OutOfBounds { bid, offset, range });
        }

        let row_bytes = (range[2] as usize) * buf.elem_size;
        let expected = (range[0] * range[1]) as usize * row_bytes;
        if bytes.len() != expected {
            return Err(StoreError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let mut src = 0usize;
        for x in offset[0]..offset[0] + range[0] {
            for y in offset[1]..offset[1] + range[1] {
                let start = buf.byte_index([x, y, offset[2]]);
                buf.data[start..start + row_bytes]
                    .copy_from_slice(&bytes[src..src + row_bytes]);
                src += row_bytes;
            }
        }

        self.stats.write().expect("store lock poisoned").write_count += 1;
        Ok(())
    }

    /// Current statistics snapshot
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        *self.stats.read().expect("store lock poisoned")
    }
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_store() -> BufferStore {
        BufferStore::new()
    }

    #[test]
    fn test_register_and_has() {
        let store = make_test_store();
        let bid = BufferId::from_raw(0);
        assert!(!store.has_buffer(bid));

        store.register_buffer(bid, Extent::d1(8), 4, None).unwrap();
        assert!(store.has_buffer(bid));
        assert_eq!(store.stats().buffer_count, 1);
        assert_eq!(store.stats().total_bytes, 32);
    }

    #[test]
    fn test_register_duplicate() {
        let store = make_test_store();
        let bid = BufferId::from_raw(0);
        store.register_buffer(bid, Extent::d1(8), 4, None).unwrap();
        let result = store.register_buffer(bid, Extent::d1(8), 4, None);
        assert_eq!(result, Err(StoreError::AlreadyRegistered { bid }));
    }

    #[test]
    fn test_unregister() {
        let store = make_test_store();
        let bid = BufferId::from_raw(0);
        store.register_buffer(bid, Extent::d1(4), 1, None).unwrap();
        store.unregister_buffer(bid).unwrap();
        assert!(!store.has_buffer(bid));
        assert_eq!(store.stats().buffer_count, 0);
    }

    #[test]
    fn test_unregister_unknown() {
        let store = make_test_store();
        let result = store.unregister_buffer(BufferId::from_raw(7));
        assert!(result.is_err());
    }

    #[test]
    fn test_host_init_roundtrip() {
        let store = make_test_store();
        let bid = BufferId::from_raw(1);
        let init: Vec<u8> = (0..8).collect();
        store
            .register_buffer(bid, Extent::d1(8), 1, Some(&init))
            .unwrap();

        let bytes = store.get_buffer_data(bid, [0, 0, 0], [8, 1, 1]).unwrap();
        assert_eq!(bytes, init);
    }

    #[test]
    fn test_host_init_size_mismatch() {
        let store = make_test_store();
        let result = store.register_buffer(
            BufferId::from_raw(1),
            Extent::d1(8),
            4,
            Some(&[0u8; 3]),
        );
        assert!(matches!(result, Err(StoreError::SizeMismatch { .. })));
    }

    #[test]
    fn test_window_write_read() {
        let store = make_test_store();
        let bid = BufferId::from_raw(2);
        store.register_buffer(bid, Extent::d1(10), 1, None).unwrap();

        store
            .set_buffer_data(bid, [3, 0, 0], [4, 1, 1], &[9, 8, 7, 6])
            .unwrap();
        let bytes = store.get_buffer_data(bid, [2, 0, 0], [6, 1, 1]).unwrap();
        assert_eq!(bytes, vec![0, 9, 8, 7, 6, 0]);
    }

    #[test]
    fn test_2d_window() {
        let store = make_test_store();
        let bid = BufferId::from_raw(3);
        store.register_buffer(bid, Extent::d2(4, 4), 1, None).unwrap();

        // write a 2x2 block at (1,1)
        store
            .set_buffer_data(bid, [1, 1, 0], [2, 2, 1], &[1, 2, 3, 4])
            .unwrap();

        let all = store.get_buffer_data(bid, [0, 0, 0], [4, 4, 1]).unwrap();
        #[rustfmt::skip]
        let expected = vec![
            0, 0, 0, 0,
            0, 1, 2, 0,
            0, 3, 4, 0,
            0, 0, 0, 0,
        ];
        assert_eq!(all, expected);
    }

    #[test]
    fn test_out_of_bounds() {
        let store = make_test_store();
        let bid = BufferId::from_raw(4);
        store.register_buffer(bid, Extent::d1(4), 1, None).unwrap();

        let result = store.get_buffer_data(bid, [2, 0, 0], [4, 1, 1]);
        assert!(matches!(result, Err(StoreError::OutOfBounds { .. })));
    }

    #[test]
    fn test_elem_size() {
        let store = make_test_store();
        let bid = BufferId::from_raw(5);
        store.register_buffer(bid, Extent::d1(2), 8, None).unwrap();
        assert_eq!(store.elem_size(bid).unwrap(), 8);
    }
}
