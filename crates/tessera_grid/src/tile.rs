//! Axis-aligned half-open boxes.

use serde::{Deserialize, Serialize};

/// An axis-aligned box `[min, max)` in the normalized 3-axis space.
///
/// A tile is empty when `min[i] >= max[i]` on any axis. Empty tiles compare
/// equal to each other regardless of coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tile {
    /// Inclusive lower corner
    pub min: [u64; 3],
    /// Exclusive upper corner
    pub max: [u64; 3],
}

impl Tile {
    /// Create a tile from corners
    #[must_use]
    pub const fn new(min: [u64; 3], max: [u64; 3]) -> Self {
        Self { min, max }
    }

    /// A canonical empty tile
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            min: [0; 3],
            max: [0; 3],
        }
    }

    /// Whether the tile covers no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|d| self.min[d] >= self.max[d])
    }

    /// Extent along each axis
    #[must_use]
    pub fn extent(&self) -> [u64; 3] {
        let mut e = [0u64; 3];
        for d in 0..3 {
            e[d] = self.max[d].saturating_sub(self.min[d]);
        }
        e
    }

    /// Number of points covered
    #[must_use]
    pub fn area(&self) -> u64 {
        let e = self.extent();
        e[0] * e[1] * e[2]
    }

    /// Intersection with another tile; possibly empty
    #[must_use]
    pub fn intersect(&self, other: &Tile) -> Tile {
        let mut min = [0u64; 3];
        let mut max = [0u64; 3];
        for d in 0..3 {
            min[d] = self.min[d].max(other.min[d]);
            max[d] = self.max[d].min(other.max[d]);
        }
        let t = Tile { min, max };
        if t.is_empty() {
            Tile::empty()
        } else {
            t
        }
    }

    /// Whether `other` is fully contained in `self`
    #[must_use]
    pub fn contains(&self, other: &Tile) -> bool {
        if other.is_empty() {
            return true;
        }
        (0..3).all(|d| self.min[d] <= other.min[d] && other.max[d] <= self.max[d])
    }

    /// Remove `other` from `self`, returning the disjoint remainder.
    ///
    /// Splits along each axis in turn, carving off the parts of `self` that
    /// lie before and after the overlap, then narrowing to the overlap for
    /// the next axis. Produces at most six tiles in three dimensions.
    #[must_use]
    pub fn difference(&self, other: &Tile) -> Vec<Tile> {
        if self.is_empty() {
            return Vec::new();
        }
        let overlap = self.intersect(other);
        if overlap.is_empty() {
            return vec![*self];
        }

        let mut parts = Vec::new();
        let mut rest = *self;
        for d in 0..3 {
            if rest.min[d] < overlap.min[d] {
                let mut below = rest;
                below.max[d] = overlap.min[d];
                parts.push(below);
            }
            if overlap.max[d] < rest.max[d] {
                let mut above = rest;
                above.min[d] = overlap.max[d];
                parts.push(above);
            }
            rest.min[d] = overlap.min[d];
            rest.max[d] = overlap.max[d];
        }
        parts
    }

    /// Merge with an adjacent tile if the union is itself a tile.
    ///
    /// Two tiles merge iff they agree on all axes except one, where they
    /// share a full face. Returns `None` otherwise.
    #[must_use]
    pub fn try_merge(&self, other: &Tile) -> Option<Tile> {
        if self.is_empty() {
            return Some(*other);
        }
        if other.is_empty() {
            return Some(*self);
        }

        let mut joint_axis = None;
        for d in 0..3 {
            if self.min[d] == other.min[d] && self.max[d] == other.max[d] {
                continue;
            }
            if joint_axis.is_some() {
                return None;
            }
            if self.max[d] == other.min[d] || other.max[d] == self.min[d] {
                joint_axis = Some(d);
            } else {
                return None;
            }
        }

        match joint_axis {
            None => Some(*self), // identical tiles
            Some(d) => {
                let mut merged = *self;
                merged.min[d] = self.min[d].min(other.min[d]);
                merged.max[d] = self.max[d].max(other.max[d]);
                Some(merged)
            }
        }
    }
}

impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => true,
            (false, false) => self.min == other.min && self.max == other.max,
            _ => false,
        }
    }
}

impl Eq for Tile {}

impl std::fmt::Display for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{},{})..[{},{},{})",
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2]
        )
    }
}

/// Lexicographic order on the lower corner, then the upper corner.
///
/// Used wherever command emission must be a pure function of inputs.
impl Ord for Tile {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.min, self.max).cmp(&(other.min, other.max))
    }
}

impl PartialOrd for Tile {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
