//! Subranges: an offset window into a global space.

use crate::extent::Extent;
use crate::region::Region;
use crate::tile::Tile;
use serde::{Deserialize, Serialize};

/// A window `{offset, range}` into a global space of size `global_size`.
///
/// After [`Subrange::clamp`], `offset[i] + range[i] <= global_size[i]` holds
/// on every axis. Unused axes follow the normalized convention: offset 0,
/// range 1, global size 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subrange {
    /// Window origin
    pub offset: [u64; 3],
    /// Window extents
    pub range: [u64; 3],
    /// Size of the surrounding global space
    pub global_size: [u64; 3],
}

impl Subrange {
    /// Create from raw normalized arrays
    #[must_use]
    pub const fn new(offset: [u64; 3], range: [u64; 3], global_size: [u64; 3]) -> Self {
        Self {
            offset,
            range,
            global_size,
        }
    }

    /// A 1-dimensional subrange
    #[must_use]
    pub const fn d1(offset: u64, range: u64, global: u64) -> Self {
        Self::new([offset, 0, 0], [range, 1, 1], [global, 1, 1])
    }

    /// A 2-dimensional subrange
    #[must_use]
    pub const fn d2(offset: [u64; 2], range: [u64; 2], global: [u64; 2]) -> Self {
        Self::new(
            [offset[0], offset[1], 0],
            [range[0], range[1], 1],
            [global[0], global[1], 1],
        )
    }

    /// The whole of an extent
    #[must_use]
    pub fn full(extent: &Extent) -> Self {
        Self::new([0; 3], extent.sizes(), extent.sizes())
    }

    /// Clamp the window so it does not reach past the global size
    #[must_use]
    pub fn clamp(mut self) -> Self {
        for d in 0..3 {
            let end = self.offset[d].saturating_add(self.range[d]).min(self.global_size[d]);
            self.range[d] = end.saturating_sub(self.offset[d]);
        }
        self
    }

    /// Re-target the window at a different global space and clamp to it
    #[must_use]
    pub fn clamp_to(mut self, extent: &Extent) -> Self {
        self.global_size = extent.sizes();
        self.clamp()
    }

    /// Number of points in the window
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.range[0] * self.range[1] * self.range[2]
    }

    /// Whether the window covers no points
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The window as a tile
    #[must_use]
    pub fn to_tile(&self) -> Tile {
        let mut max = [0u64; 3];
        for d in 0..3 {
            max[d] = self.offset[d] + self.range[d];
        }
        Tile::new(self.offset, max)
    }

    /// The window as a region
    #[must_use]
    pub fn to_region(&self) -> Region {
        Region::single(self.to_tile())
    }

    /// Rebuild a subrange from a tile within a global space
    #[must_use]
    pub fn from_tile(tile: &Tile, global_size: [u64; 3]) -> Self {
        Self::new(tile.min, tile.extent(), global_size)
    }
}

impl std::fmt::Display for Subrange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "+[{},{},{}] x [{},{},{}] / [{},{},{}]",
            self.offset[0],
            self.offset[1],
            self.offset[2],
            self.range[0],
            self.range[1],
            self.range[2],
            self.global_size[0],
            self.global_size[1],
            self.global_size[2]
        )
    }
}
