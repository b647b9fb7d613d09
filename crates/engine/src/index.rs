//! Outgoing-edge adjacency index derived from the [`EdgeStore`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use trustgraph_core::{AccountId, Edge};

use crate::store::{EdgeObserver, EdgeSnapshot};

/// Per-node adjacency lists of passable (capacity > 0) edges.
///
/// Each node's list is guarded independently; a traversal reads one node at
/// a time and never holds a lock across nodes. Lists are keyed by trustee so
/// neighbor order is deterministic.
#[derive(Debug, Default)]
pub struct GraphIndex {
    adjacency: DashMap<AccountId, BTreeMap<AccountId, u64>>,
}

impl GraphIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a store snapshot.
    pub fn from_snapshot(snapshot: &EdgeSnapshot) -> Self {
        let index = Self::new();
        for edge in snapshot {
            index.apply(edge);
        }
        index
    }

    /// Drop every adjacency list. Only the store calls this, with writers paused.
    pub(crate) fn clear(&self) {
        self.adjacency.clear();
    }

    /// All passable outgoing edges of `node`, ordered by trustee.
    pub fn neighbors(&self, node: &AccountId) -> Vec<(AccountId, u64)> {
        self.neighbors_at_least(node, 0)
    }

    /// Outgoing edges of `node` whose capacity is at least `min_capacity`.
    ///
    /// Zero-capacity edges are never returned, whatever the threshold.
    pub fn neighbors_at_least(&self, node: &AccountId, min_capacity: u64) -> Vec<(AccountId, u64)> {
        self.adjacency
            .get(node)
            .map(|list| {
                list.iter()
                    .filter(|(_, capacity)| **capacity >= min_capacity)
                    .map(|(trustee, capacity)| (trustee.clone(), *capacity))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Insert, update or drop the adjacency entry for `edge`.
    pub fn apply(&self, edge: &Edge) {
        if edge.is_passable() {
            self.adjacency
                .entry(edge.truster.clone())
                .or_default()
                .insert(edge.trustee.clone(), edge.capacity);
            return;
        }

        if let Entry::Occupied(mut list) = self.adjacency.entry(edge.truster.clone()) {
            list.get_mut().remove(&edge.trustee);
            if list.get().is_empty() {
                list.remove();
            }
        }
    }

    /// Number of nodes with at least one passable outgoing edge.
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of passable edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(|list| list.len()).sum()
    }
}

impl EdgeObserver for GraphIndex {
    fn on_edge_changed(&self, edge: &Edge) {
        self.apply(edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EdgeStore;
    use std::sync::Arc;
    use trustgraph_core::TrustLine;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    fn edge(truster: &str, trustee: &str, capacity: u64) -> Edge {
        Edge {
            truster: id(truster),
            trustee: id(trustee),
            capacity,
            last_block: 1,
        }
    }

    #[test]
    fn test_neighbors_sorted_by_trustee() {
        let index = GraphIndex::new();
        index.apply(&edge("A", "D", 1));
        index.apply(&edge("A", "B", 5));
        index.apply(&edge("A", "C", 3));

        let trustees: Vec<_> = index
            .neighbors(&id("A"))
            .into_iter()
            .map(|(t, _)| t.to_string())
            .collect();
        assert_eq!(trustees, vec!["B", "C", "D"]);
    }

    #[test]
    fn test_update_and_logical_removal() {
        let index = GraphIndex::new();
        index.apply(&edge("A", "B", 5));
        index.apply(&edge("A", "B", 8));
        assert_eq!(index.neighbors(&id("A")), vec![(id("B"), 8)]);

        index.apply(&edge("A", "B", 0));
        assert!(index.neighbors(&id("A")).is_empty());
        assert_eq!(index.node_count(), 0);

        // Removing an unknown edge is a no-op.
        index.apply(&edge("Z", "B", 0));
        assert_eq!(index.edge_count(), 0);
    }

    #[test]
    fn test_threshold_filter() {
        let index = GraphIndex::new();
        index.apply(&edge("A", "B", 5));
        index.apply(&edge("A", "C", 10));

        assert_eq!(index.neighbors_at_least(&id("A"), 6), vec![(id("C"), 10)]);
        assert!(index.neighbors_at_least(&id("A"), 11).is_empty());
        assert!(index.neighbors(&id("unknown")).is_empty());
    }

    #[test]
    fn test_follows_store_notifications() {
        let index = Arc::new(GraphIndex::new());
        let store = EdgeStore::with_observers(vec![index.clone() as Arc<dyn EdgeObserver>]);

        store.upsert(&TrustLine::from_parts("A", "B", 10, 5).unwrap());
        store.upsert(&TrustLine::from_parts("A", "B", 3, 4).unwrap());
        assert_eq!(index.neighbors(&id("A")), vec![(id("B"), 10)]);

        store.upsert(&TrustLine::from_parts("A", "B", 0, 6).unwrap());
        assert!(index.neighbors(&id("A")).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rebuild_matches_incremental_state() {
        let incremental = Arc::new(GraphIndex::new());
        let store = EdgeStore::with_observers(vec![incremental.clone() as Arc<dyn EdgeObserver>]);
        store.upsert(&TrustLine::from_parts("A", "B", 10, 5).unwrap());
        store.upsert(&TrustLine::from_parts("B", "C", 7, 6).unwrap());
        store.upsert(&TrustLine::from_parts("C", "A", 0, 7).unwrap());

        let rebuilt = GraphIndex::from_snapshot(&store.snapshot_all());
        assert_eq!(rebuilt.edge_count(), incremental.edge_count());
        for node in ["A", "B", "C"] {
            assert_eq!(rebuilt.neighbors(&id(node)), incremental.neighbors(&id(node)));
        }

        incremental.apply(&edge("X", "Y", 1));
        store.rebuild_index(&incremental);
        assert!(incremental.neighbors(&id("X")).is_empty());
        assert_eq!(incremental.edge_count(), 2);
    }

    #[test]
    fn test_rebuild_keeps_changes_made_after_earlier_snapshot() {
        let index = Arc::new(GraphIndex::new());
        let store = EdgeStore::with_observers(vec![index.clone() as Arc<dyn EdgeObserver>]);
        store.upsert(&TrustLine::from_parts("A", "B", 10, 5).unwrap());

        let before = store.snapshot_all();
        store.upsert(&TrustLine::from_parts("A", "B", 0, 6).unwrap());
        store.rebuild_index(&index);

        assert!(index.neighbors(&id("A")).is_empty());
        assert_eq!(store.get(&id("A"), &id("B")).unwrap().capacity, 0);
        // The stale snapshot still describes the old state.
        assert_eq!(GraphIndex::from_snapshot(&before).neighbors(&id("A")), vec![(id("B"), 10)]);
    }
}
