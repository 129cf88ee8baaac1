use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::types::NodeId;

use super::index::GraphIndex;

/// Breadth-first hop-count search over a [`GraphIndex`].
pub struct PathFinder<'a> {
    index: &'a GraphIndex,
}

impl<'a> PathFinder<'a> {
    /// Search over `index`.
    pub fn new(index: &'a GraphIndex) -> Self {
        Self { index }
    }

    /// Hops on the shortest path from `from` to `to`, or `None` when either
    /// endpoint is absent or no path exists.
    ///
    /// Neighbors are discovered in [`GraphIndex::neighbors`] order.
    pub fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<u32> {
        if !self.index.vertex_exists(from) || !self.index.vertex_exists(to) {
            return None;
        }
        if from == to {
            return Some(0);
        }
        let mut distance: FxHashMap<NodeId, u32> = FxHashMap::default();
        let mut queue = VecDeque::new();
        distance.insert(from, 0);
        queue.push_back(from);
        while let Some(current) = queue.pop_front() {
            let hops = distance.get(&current).copied().unwrap_or_default() + 1;
            let Some(neighbors) = self.index.neighbors(current) else {
                continue;
            };
            for next in neighbors {
                if distance.contains_key(&next) {
                    continue;
                }
                if next == to {
                    return Some(hops);
                }
                distance.insert(next, hops);
                queue.push_back(next);
            }
        }
        None
    }
}
