//! Buffer extents and global iteration spaces.

use crate::region::Region;
use crate::tile::Tile;
use serde::{Deserialize, Serialize};

/// The size of a buffer or of a kernel's global iteration space.
///
/// Tracks the declared dimensionality (1, 2, or 3); unused axes are
/// normalized to extent 1 so all downstream arithmetic is 3-axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    dims: u8,
    sizes: [u64; 3],
}

impl Extent {
    /// A 1-dimensional extent
    #[must_use]
    pub const fn d1(x: u64) -> Self {
        Self {
            dims: 1,
            sizes: [x, 1, 1],
        }
    }

    /// A 2-dimensional extent
    #[must_use]
    pub const fn d2(x: u64, y: u64) -> Self {
        Self {
            dims: 2,
            sizes: [x, y, 1],
        }
    }

    /// A 3-dimensional extent
    #[must_use]
    pub const fn d3(x: u64, y: u64, z: u64) -> Self {
        Self {
            dims: 3,
            sizes: [x, y, z],
        }
    }

    /// Declared dimensionality (1, 2, or 3)
    #[must_use]
    pub const fn dims(&self) -> u8 {
        self.dims
    }

    /// Normalized per-axis sizes
    #[must_use]
    pub const fn sizes(&self) -> [u64; 3] {
        self.sizes
    }

    /// Total number of points
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.sizes[0] * self.sizes[1] * self.sizes[2]
    }

    /// Whether the extent covers no points
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full extent as a tile rooted at the origin
    #[must_use]
    pub fn to_tile(&self) -> Tile {
        Tile::new([0; 3], self.sizes)
    }

    /// The full extent as a region
    #[must_use]
    pub fn to_region(&self) -> Region {
        Region::single(self.to_tile())
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.dims {
            1 => write!(f, "{{{}}}", self.sizes[0]),
            2 => write!(f, "{{{}, {}}}", self.sizes[0], self.sizes[1]),
            _ => write!(f, "{{{}, {}, {}}}", self.sizes[0], self.sizes[1], self.sizes[2]),
        }
    }
}
