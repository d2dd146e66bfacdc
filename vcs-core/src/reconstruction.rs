//! Reconstruction-path discovery over a delta graph (§4.5): the shortest sequence of
//! hashes from a requested node down to a stored full blob ("base").
//!
//! Grounded on `original_source/graph.cc`'s `get_reconstruction_path`: the same
//! parallel-path BFS, kept as a free function over an abstract graph trait rather than
//! wired into any particular on-disk store — `reconstruction_graph` there is likewise
//! kept separate from the real db so this search only ever touches the part of the
//! ancestry it actually walks.

use crate::error::{CoreError, Result};
use crate::hash::ContentHash;
use std::collections::BTreeSet;

pub type ReconstructionPath = Vec<ContentHash>;

/// the abstract view of a delta store this search needs: which nodes are full blobs,
/// and which nodes a given node has a stored delta against.
pub trait ReconstructionGraph {
    fn is_base(&self, node: ContentHash) -> bool;
    fn next(&self, node: ContentHash) -> BTreeSet<ContentHash>;
}

/// breadth-first search from `start`, returning `[start, ..., base]`. Every path grows
/// by one step per round; a fork duplicates the path; a node already claimed by another
/// path kills this branch (so total work stays linear in the reachable node count, not
/// exponential in the fork count). The first path to land on a base wins.
pub fn get_reconstruction_path(
    start: ContentHash,
    graph: &impl ReconstructionGraph,
) -> Result<ReconstructionPath> {
    trace!("get_reconstruction_path({})", start);
    let mut live_paths: Vec<Vec<ContentHash>> = vec![vec![start]];
    let mut seen: BTreeSet<ContentHash> = std::iter::once(start).collect();

    loop {
        let mut next_paths = Vec::new();
        for path in &live_paths {
            let tip = *path.last().expect("a path is never empty");
            if graph.is_base(tip) {
                return Ok(path.clone());
            }
            for next in graph.next(tip) {
                if path.contains(&next) {
                    return Err(CoreError::CycleInGraph.into());
                }
                if seen.contains(&next) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(next);
                seen.insert(next);
                next_paths.push(extended);
            }
        }
        if next_paths.is_empty() {
            return Err(CoreError::Unreachable.into());
        }
        live_paths = next_paths;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn h(n: u8) -> ContentHash {
        ContentHash::new([n; 20])
    }

    struct MockGraph {
        edges: BTreeMap<ContentHash, BTreeSet<ContentHash>>,
        bases: BTreeSet<ContentHash>,
    }

    impl ReconstructionGraph for MockGraph {
        fn is_base(&self, node: ContentHash) -> bool {
            self.bases.contains(&node)
        }

        fn next(&self, node: ContentHash) -> BTreeSet<ContentHash> {
            self.edges.get(&node).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn base_reconstructs_to_itself() {
        let graph = MockGraph { edges: BTreeMap::new(), bases: std::iter::once(h(1)).collect() };
        assert_eq!(get_reconstruction_path(h(1), &graph).unwrap(), vec![h(1)]);
    }

    #[test]
    fn linear_chain_to_base() {
        let mut edges = BTreeMap::new();
        edges.insert(h(2), std::iter::once(h(1)).collect());
        edges.insert(h(3), std::iter::once(h(2)).collect());
        let graph = MockGraph { edges, bases: std::iter::once(h(1)).collect() };
        assert_eq!(get_reconstruction_path(h(3), &graph).unwrap(), vec![h(3), h(2), h(1)]);
    }

    #[test]
    fn forked_paths_both_reach_the_unique_base() {
        // n2 -> n1 -> n0, and n2 -> n3 -> n0; n0 is the only base. both branches are
        // length 3 and either is an acceptable shortest path.
        let mut edges = BTreeMap::new();
        edges.insert(h(2), [h(1), h(3)].into_iter().collect());
        edges.insert(h(1), std::iter::once(h(0)).collect());
        edges.insert(h(3), std::iter::once(h(0)).collect());
        let graph = MockGraph { edges, bases: std::iter::once(h(0)).collect() };
        let path = get_reconstruction_path(h(2), &graph).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], h(2));
        assert_eq!(*path.last().unwrap(), h(0));
    }

    #[test]
    fn unreachable_node_is_an_error() {
        let graph = MockGraph { edges: BTreeMap::new(), bases: BTreeSet::new() };
        let err = get_reconstruction_path(h(5), &graph).unwrap_err();
        assert_eq!(err.downcast_ref::<CoreError>(), Some(&CoreError::Unreachable));
    }

    #[test]
    fn cycle_is_detected() {
        let mut edges = BTreeMap::new();
        edges.insert(h(1), std::iter::once(h(2)).collect());
        edges.insert(h(2), std::iter::once(h(1)).collect());
        let graph = MockGraph { edges, bases: BTreeSet::new() };
        let err = get_reconstruction_path(h(1), &graph).unwrap_err();
        assert_eq!(err.downcast_ref::<CoreError>(), Some(&CoreError::CycleInGraph));
    }
}
