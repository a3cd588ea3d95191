use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap, VecDeque},
    sync::Arc,
};

use crate::model::{Location, Region};

use super::PathCalculator;

/// Single-source shortest paths over a [`Region`]'s edge durations, using
/// the same `BinaryHeap<Reverse<_>>` min-heap idiom the vehicle manager's
/// event queue uses for its own ordering.
pub struct DijkstraPathCalculator {
    region: Arc<Region>,
}

impl DijkstraPathCalculator {
    pub fn new(region: Arc<Region>) -> Self {
        Self { region }
    }

    /// Distance and predecessor maps for every node reachable from `source`.
    /// The heap key is `(distance, Location)` so that nodes tied on
    /// distance pop in ascending `Location` order, making the resulting
    /// predecessor tree (and therefore every derived path) deterministic.
    fn shortest_paths(&self, source: Location) -> BTreeMap<Location, (u64, Option<Location>)> {
        let mut best: BTreeMap<Location, (u64, Option<Location>)> = BTreeMap::new();
        let mut heap = BinaryHeap::new();

        best.insert(source, (0, None));
        heap.push(Reverse((0u64, source)));

        while let Some(Reverse((dist, node))) = heap.pop() {
            match best.get(&node) {
                Some(&(known, _)) if known < dist => continue,
                _ => {}
            }
            let Some(region_node) = self.region.node_at(node) else {
                continue;
            };
            for &neighbor in &region_node.connections {
                let Some(edge) = self.region.edge_between(node, neighbor) else {
                    continue;
                };
                let candidate = dist + edge.duration as u64;
                let better = match best.get(&neighbor) {
                    Some(&(known, _)) => candidate < known,
                    None => true,
                };
                if better {
                    best.insert(neighbor, (candidate, Some(node)));
                    heap.push(Reverse((candidate, neighbor)));
                }
            }
        }

        best
    }

    fn reconstruct(
        tree: &BTreeMap<Location, (u64, Option<Location>)>,
        source: Location,
        target: Location,
    ) -> VecDeque<Location> {
        if source == target || !tree.contains_key(&target) {
            return VecDeque::new();
        }
        let mut rev = vec![target];
        let mut cur = target;
        while let Some(&(_, Some(prev))) = tree.get(&cur) {
            if prev == source {
                break;
            }
            rev.push(prev);
            cur = prev;
        }
        rev.reverse();
        rev.into()
    }
}

impl PathCalculator for DijkstraPathCalculator {
    fn path(&self, from: Location, to: Location) -> VecDeque<Location> {
        let tree = self.shortest_paths(from);
        Self::reconstruct(&tree, from, to)
    }

    fn all_paths_from(&self, source: Location) -> BTreeMap<Location, VecDeque<Location>> {
        let tree = self.shortest_paths(source);
        tree.keys()
            .filter(|&&loc| loc != source)
            .map(|&loc| (loc, Self::reconstruct(&tree, source, loc)))
            .collect()
    }
}
