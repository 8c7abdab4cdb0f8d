//! Regions: finite unions of disjoint tiles.

use crate::tile::Tile;
use serde::{Deserialize, Serialize};

/// A finite set of pairwise disjoint tiles.
///
/// The constituent tiles carry no semantically observable order; equality
/// is point-set equality, not representation equality. Operations return
/// canonicalized regions in which face-adjacent tiles have been coalesced
/// where the union remains a tile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    tiles: Vec<Tile>,
}

impl Region {
    /// The empty region
    #[must_use]
    pub const fn empty() -> Self {
        Self { tiles: Vec::new() }
    }

    /// A region of a single tile
    #[must_use]
    pub fn single(tile: Tile) -> Self {
        if tile.is_empty() {
            Self::empty()
        } else {
            Self { tiles: vec![tile] }
        }
    }

    /// Build a region from tiles that may overlap, merging as needed
    #[must_use]
    pub fn from_tiles<I: IntoIterator<Item = Tile>>(tiles: I) -> Self {
        let mut region = Self::empty();
        for tile in tiles {
            region = region.merge(&Self::single(tile));
        }
        region
    }

    /// Whether the region covers no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// The constituent tiles
    #[must_use]
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Invoke `f` on each constituent tile
    pub fn scan_by_boxes<F: FnMut(&Tile)>(&self, mut f: F) {
        for tile in &self.tiles {
            f(tile);
        }
    }

    /// Sum of tile areas
    #[must_use]
    pub fn area(&self) -> u64 {
        self.tiles.iter().map(Tile::area).sum()
    }

    /// Set intersection
    #[must_use]
    pub fn intersect(&self, other: &Region) -> Region {
        let mut out = Vec::new();
        for a in &self.tiles {
            for b in &other.tiles {
                let t = a.intersect(b);
                if !t.is_empty() {
                    out.push(t);
                }
            }
        }
        Self::canonicalize(out)
    }

    /// Set difference `self \ other`
    #[must_use]
    pub fn difference(&self, other: &Region) -> Region {
        let mut out = Vec::new();
        for a in &self.tiles {
            let mut rest = vec![*a];
            for b in &other.tiles {
                let mut next = Vec::new();
                for r in &rest {
                    next.extend(r.difference(b));
                }
                rest = next;
                if rest.is_empty() {
                    break;
                }
            }
            out.extend(rest);
        }
        Self::canonicalize(out)
    }

    /// Set union
    #[must_use]
    pub fn merge(&self, other: &Region) -> Region {
        let mut out = self.tiles.clone();
        out.extend(other.difference(self).tiles);
        Self::canonicalize(out)
    }

    /// Coalesce face-adjacent tiles until no pair merges
    fn canonicalize(mut tiles: Vec<Tile>) -> Region {
        tiles.retain(|t| !t.is_empty());
        loop {
            let mut merged = false;
            'outer: for i in 0..tiles.len() {
                for j in (i + 1)..tiles.len() {
                    if let Some(m) = tiles[i].try_merge(&tiles[j]) {
                        tiles[i] = m;
                        tiles.swap_remove(j);
                        merged = true;
                        break 'outer;
                    }
                }
            }
            if !merged {
                break;
            }
        }
        Region { tiles }
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Tile> for Region {
    fn from(tile: Tile) -> Self {
        Self::single(tile)
    }
}

/// Point-set equality: two regions are equal iff neither covers a point
/// the other does not, regardless of how they are decomposed into tiles.
impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.difference(other).is_empty() && other.difference(self).is_empty()
    }
}

impl Eq for Region {}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, t) in self.tiles.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", t)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn r1(lo: u64, hi: u64) -> Region {
        Region::single(Tile::new([lo, 0, 0], [hi, 1, 1]))
    }

    #[test]
    fn test_empty_region() {
        let r = Region::empty();
        assert!(r.is_empty());
        assert_eq!(r.area(), 0);
    }

    #[test]
    fn test_single_empty_tile() {
        let r = Region::single(Tile::empty());
        assert!(r.is_empty());
    }

    #[test]
    fn test_intersect_commutative() {
        let a = r1(0, 10);
        let b = r1(5, 15);
        assert_eq!(a.intersect(&b), b.intersect(&a));
        assert_eq!(a.intersect(&b).area(), 5);
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let a = r1(3, 9);
        assert_eq!(a.merge(&Region::empty()), a);
        assert_eq!(Region::empty().merge(&a), a);
    }

    #[test]
    fn test_merge_adjacent_coalesces() {
        let a = r1(0, 5);
        let b = r1(5, 10);
        let m = a.merge(&b);
        assert_eq!(m.tiles().len(), 1);
        assert_eq!(m, r1(0, 10));
    }

    #[test]
    fn test_merge_overlapping() {
        let a = r1(0, 7);
        let b = r1(4, 10);
        let m = a.merge(&b);
        assert_eq!(m.area(), 10);
        assert_eq!(m, r1(0, 10));
    }

    #[test]
    fn test_difference_partition_law() {
        let a = r1(0, 10);
        let b = r1(4, 20);
        let inter = a.intersect(&b);
        let diff = a.difference(&inter);
        assert_eq!(diff.area() + inter.area(), a.area());
    }

    #[test]
    fn test_difference_hole() {
        let a = r1(0, 10);
        let b = r1(3, 6);
        let d = a.difference(&b);
        assert_eq!(d.area(), 7);
        assert!(d.intersect(&b).is_empty());
    }

    #[test]
    fn test_equality_different_decompositions() {
        let whole = r1(0, 10);
        let split = Region::from_tiles([
            Tile::new([0, 0, 0], [4, 1, 1]),
            Tile::new([4, 0, 0], [10, 1, 1]),
        ]);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_2d_merge_l_shape() {
        let a = Region::single(Tile::new([0, 0, 0], [4, 2, 1]));
        let b = Region::single(Tile::new([0, 2, 0], [2, 4, 1]));
        let m = a.merge(&b);
        assert_eq!(m.area(), 8 + 4);
        // L-shape cannot be a single tile
        assert!(m.tiles().len() >= 2);
    }

    #[test]
    fn test_scan_by_boxes_visits_every_tile() {
        let region = Region::from_tiles([
            Tile::new([0, 0, 0], [4, 1, 1]),
            Tile::new([6, 0, 0], [9, 1, 1]),
        ]);

        let mut visited = 0u64;
        region.scan_by_boxes(|tile| visited += tile.area());
        assert_eq!(visited, region.area());

        let mut count = 0;
        region.scan_by_boxes(|_| count += 1);
        assert_eq!(count, region.tiles().len());
    }

    #[test]
    fn test_scan_by_boxes_empty() {
        let mut count = 0;
        Region::empty().scan_by_boxes(|_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_tiles_disjoint_after_ops() {
        let a = Region::single(Tile::new([0, 0, 0], [8, 8, 1]));
        let b = Region::single(Tile::new([2, 2, 0], [6, 6, 1]));
        let d = a.difference(&b);
        let tiles = d.tiles();
        for (i, p) in tiles.iter().enumerate() {
            for q in tiles.iter().skip(i + 1) {
                assert!(p.intersect(q).is_empty());
            }
        }
    }

    fn arb_tile_1d() -> impl Strategy<Value = Tile> + Clone {
        (0u64..32, 1u64..16).prop_map(|(lo, len)| Tile::new([lo, 0, 0], [lo + len, 1, 1]))
    }

    fn arb_tile_2d() -> impl Strategy<Value = Tile> + Clone {
        (0u64..16, 1u64..8, 0u64..16, 1u64..8)
            .prop_map(|(x, w, y, h)| Tile::new([x, y, 0], [x + w, y + h, 1]))
    }

    fn arb_region(tile: impl Strategy<Value = Tile> + Clone) -> impl Strategy<Value = Region> {
        proptest::collection::vec(tile, 0..5).prop_map(Region::from_tiles)
    }

    proptest::proptest! {
        #[test]
        fn prop_intersect_commutative(
            a in arb_region(arb_tile_2d()),
            b in arb_region(arb_tile_2d()),
        ) {
            prop_assert_eq!(a.intersect(&b), b.intersect(&a));
        }

        #[test]
        fn prop_area_partition(
            a in arb_region(arb_tile_2d()),
            b in arb_region(arb_tile_2d()),
        ) {
            let inter = a.intersect(&b);
            let diff = a.difference(&inter);
            prop_assert_eq!(diff.area() + inter.area(), a.area());
        }

        #[test]
        fn prop_merge_area(
            a in arb_region(arb_tile_1d()),
            b in arb_region(arb_tile_1d()),
        ) {
            let m = a.merge(&b);
            let inter = a.intersect(&b);
            prop_assert_eq!(m.area() + inter.area(), a.area() + b.area());
        }

        #[test]
        fn prop_merge_empty_identity(a in arb_region(arb_tile_2d())) {
            prop_assert_eq!(a.merge(&Region::empty()), a);
        }

        #[test]
        fn prop_difference_disjoint_from_subtrahend(
            a in arb_region(arb_tile_2d()),
            b in arb_region(arb_tile_2d()),
        ) {
            let d = a.difference(&b);
            prop_assert!(d.intersect(&b).is_empty());
        }
    }
}
