//! Per-buffer distributed ownership tracking.
//!
//! For each buffer, a list of `(region, node set)` pairs records which
//! nodes hold a current copy of which part of the buffer. The pairs
//! partition the buffer extent: every point is covered by exactly one
//! pair, and no two pairs share a node set.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tessera_core::{BufferId, CoreError, CoreResult, NodeId};
use tessera_grid::{Extent, Region, Tile};

/// Distributed ownership map for one buffer.
///
/// The initial state lists the full extent as owned by all worker nodes
/// (every node starts with the same host-provided contents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferState {
    bid: BufferId,
    extent: Extent,
    region_nodes: Vec<(Region, BTreeSet<NodeId>)>,
}

impl BufferState {
    /// Create the initial state: full extent owned by nodes `0..num_nodes`
    #[must_use]
    pub fn new(bid: BufferId, extent: Extent, num_nodes: usize) -> Self {
        let all_nodes: BTreeSet<NodeId> =
            (0..num_nodes as u64).map(NodeId::from_raw).collect();
        Self {
            bid,
            extent,
            region_nodes: vec![(extent.to_region(), all_nodes)],
        }
    }

    /// The buffer this state tracks
    #[must_use]
    pub const fn buffer(&self) -> BufferId {
        self.bid
    }

    /// Declared dimensionality of the tracked buffer
    #[must_use]
    pub const fn dimensions(&self) -> u8 {
        self.extent.dims()
    }

    /// The tracked buffer extent
    #[must_use]
    pub const fn extent(&self) -> &Extent {
        &self.extent
    }

    /// The stored `(region, node set)` pairs
    #[must_use]
    pub fn pairs(&self) -> &[(Region, BTreeSet<NodeId>)] {
        &self.region_nodes
    }

    /// Resolve `request` into a cover of `(tile, owner set)` entries.
    ///
    /// Greedy largest-overlap-first: repeatedly pick the stored pair whose
    /// intersection with the uncovered remainder has the greatest area
    /// (ties broken by lowest stored index), emit its intersection tiles,
    /// and subtract them from the remainder. Each step strictly shrinks
    /// the remainder, so the loop terminates.
    ///
    /// The returned tiles are pairwise disjoint and together cover
    /// `request` intersected with the buffer extent.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if some part of the clamped request
    /// is covered by no stored pair, which cannot happen unless the
    /// partition invariant is already broken.
    pub fn get_source_nodes(
        &self,
        request: &Region,
    ) -> CoreResult<Vec<(Tile, BTreeSet<NodeId>)>> {
        let mut result = Vec::new();
        let mut remaining = request.intersect(&self.extent.to_region());

        while !remaining.is_empty() {
            let mut largest_overlap = 0u64;
            let mut largest_i = None;
            for (i, (region, _)) in self.region_nodes.iter().enumerate() {
                let area = region.intersect(&remaining).area();
                if area > largest_overlap {
                    largest_overlap = area;
                    largest_i = Some(i);
                }
            }

            let Some(i) = largest_i else {
                return Err(CoreError::invariant(
                    Some(self.bid),
                    format!("no stored pair overlaps remainder {}", remaining),
                ));
            };

            let overlap = self.region_nodes[i].0.intersect(&remaining);
            remaining = remaining.difference(&overlap);
            overlap.scan_by_boxes(|tile| {
                result.push((*tile, self.region_nodes[i].1.clone()));
            });
        }

        Ok(result)
    }

    /// Record that `nodes` now hold the current copy of `region`.
    ///
    /// Overlapping stored pairs are split: fully-contained pairs are
    /// removed, partially-overlapping pairs are shrunk by the written
    /// region, and a single new `(region, nodes)` pair is appended. The
    /// state is then canonicalized. The partition invariant holds on
    /// return.
    pub fn update_region(&mut self, region: &Region, nodes: BTreeSet<NodeId>) {
        let region = region.intersect(&self.extent.to_region());
        if region.is_empty() {
            return;
        }

        let mut kept = Vec::with_capacity(self.region_nodes.len() + 1);
        for (stored, owners) in self.region_nodes.drain(..) {
            let diff = stored.difference(&region);
            if !diff.is_empty() {
                kept.push((diff, owners));
            }
        }
        kept.push((region, nodes));
        self.region_nodes = kept;

        self.collapse();
    }

    /// Merge pairs whose node sets are equal.
    ///
    /// Pairs whose node sets merely overlap or contain one another are
    /// left alone; merging them would misstate ownership of one side.
    fn collapse(&mut self) {
        let mut grouped: IndexMap<BTreeSet<NodeId>, Region> = IndexMap::new();
        for (region, owners) in self.region_nodes.drain(..) {
            match grouped.entry(owners) {
                indexmap::map::Entry::Occupied(mut e) => {
                    let merged = e.get().merge(&region);
                    *e.get_mut() = merged;
                }
                indexmap::map::Entry::Vacant(e) => {
                    e.insert(region);
                }
            }
        }
        self.region_nodes = grouped
            .into_iter()
            .map(|(owners, region)| (region, owners))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[u64]) -> BTreeSet<NodeId> {
        ids.iter().copied().map(NodeId::from_raw).collect()
    }

    fn r1(lo: u64, hi: u64) -> Region {
        Region::single(Tile::new([lo, 0, 0], [hi, 1, 1]))
    }

    fn make_test_state(extent: u64, num_nodes: usize) -> BufferState {
        BufferState::new(BufferId::from_raw(0), Extent::d1(extent), num_nodes)
    }

    #[test]
    fn test_initial_state_all_nodes() {
        // S1: fresh buffer of extent {10} with two nodes
        let state = make_test_state(10, 2);
        let sources = state.get_source_nodes(&r1(0, 10)).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].0, Tile::new([0, 0, 0], [10, 1, 1]));
        assert_eq!(sources[0].1, nodes(&[0, 1]));
    }

    #[test]
    fn test_half_write_splits_ownership() {
        // S2: node 0 writes the first half
        let mut state = make_test_state(10, 2);
        state.update_region(&r1(0, 5), nodes(&[0]));

        let sources = state.get_source_nodes(&r1(0, 10)).unwrap();
        assert_eq!(sources.len(), 2);
        let mut by_tile: Vec<_> = sources;
        by_tile.sort_by_key(|(t, _)| *t);
        assert_eq!(by_tile[0].0, Tile::new([0, 0, 0], [5, 1, 1]));
        assert_eq!(by_tile[0].1, nodes(&[0]));
        assert_eq!(by_tile[1].0, Tile::new([5, 0, 0], [10, 1, 1]));
        assert_eq!(by_tile[1].1, nodes(&[0, 1]));
    }

    #[test]
    fn test_partition_invariant_holds() {
        let mut state = make_test_state(16, 4);
        state.update_region(&r1(0, 4), nodes(&[0]));
        state.update_region(&r1(4, 8), nodes(&[1]));
        state.update_region(&r1(2, 6), nodes(&[2]));

        // pairs partition the extent
        let mut union = Region::empty();
        let mut total = 0;
        for (region, _) in state.pairs() {
            total += region.area();
            assert!(union.intersect(region).is_empty());
            union = union.merge(region);
        }
        assert_eq!(total, 16);
        assert_eq!(union, Extent::d1(16).to_region());
    }

    #[test]
    fn test_no_duplicate_node_sets() {
        let mut state = make_test_state(12, 2);
        state.update_region(&r1(0, 3), nodes(&[0]));
        state.update_region(&r1(6, 9), nodes(&[0]));

        // both writes by node 0 collapse into a single pair
        let zero_sets = state
            .pairs()
            .iter()
            .filter(|(_, owners)| *owners == nodes(&[0]))
            .count();
        assert_eq!(zero_sets, 1);

        // node sets are pairwise distinct
        for (i, (_, a)) in state.pairs().iter().enumerate() {
            for (_, b) in state.pairs().iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_full_overwrite_resets() {
        let mut state = make_test_state(8, 2);
        state.update_region(&r1(0, 4), nodes(&[0]));
        state.update_region(&r1(0, 8), nodes(&[1]));

        assert_eq!(state.pairs().len(), 1);
        assert_eq!(state.pairs()[0].1, nodes(&[1]));
        assert_eq!(state.pairs()[0].0.area(), 8);
    }

    #[test]
    fn test_source_cover_disjoint_and_exact() {
        let mut state = make_test_state(10, 3);
        state.update_region(&r1(0, 3), nodes(&[0]));
        state.update_region(&r1(3, 7), nodes(&[1]));

        let request = r1(1, 9);
        let sources = state.get_source_nodes(&request).unwrap();

        let mut covered = Region::empty();
        for (tile, _) in &sources {
            assert!(covered.intersect(&Region::single(*tile)).is_empty());
            covered = covered.merge(&Region::single(*tile));
        }
        assert_eq!(covered, request);
    }

    #[test]
    fn test_request_clamped_to_extent() {
        let state = make_test_state(8, 2);
        let sources = state.get_source_nodes(&r1(4, 20)).unwrap();
        let total: u64 = sources.iter().map(|(t, _)| t.area()).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_largest_overlap_first() {
        let mut state = make_test_state(10, 2);
        // node 0 owns [0,2), both own [2,10)
        state.update_region(&r1(0, 2), nodes(&[0]));

        // request [0,10): the {0,1} pair has the larger overlap (8 > 2)
        // and is emitted first
        let sources = state.get_source_nodes(&r1(0, 10)).unwrap();
        assert_eq!(sources[0].1, nodes(&[0, 1]));
        assert_eq!(sources[0].0.area(), 8);
    }

    #[test]
    fn test_update_region_2d() {
        let mut state =
            BufferState::new(BufferId::from_raw(1), Extent::d2(8, 8), 2);
        let written = Region::single(Tile::new([0, 0, 0], [4, 8, 1]));
        state.update_region(&written, nodes(&[0]));

        let sources = state.get_source_nodes(&written).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].1, nodes(&[0]));

        let rest = Region::single(Tile::new([4, 0, 0], [8, 8, 1]));
        let sources = state.get_source_nodes(&rest).unwrap();
        assert_eq!(sources[0].1, nodes(&[0, 1]));
    }

    #[test]
    fn test_dimensions() {
        let state = BufferState::new(BufferId::from_raw(2), Extent::d3(2, 2, 2), 1);
        assert_eq!(state.dimensions(), 3);
    }
}
