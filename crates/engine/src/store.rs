//! Authoritative edge storage with per-pair latest-wins semantics.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use trustgraph_core::{AccountId, Edge, TrustLine};

use crate::index::GraphIndex;

/// Receives every accepted edge change.
///
/// Called synchronously while the per-pair lock is held, so changes to one
/// pair arrive in the order they were applied. Implementations must not call
/// back into the [`EdgeStore`].
pub trait EdgeObserver: Send + Sync {
    /// An edge was inserted or its capacity changed.
    fn on_edge_changed(&self, edge: &Edge);
}

/// Why an upsert was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The stored edge was set at a later block.
    Stale {
        /// Block number of the stored edge.
        stored_block: u64,
    },
    /// Same block and same capacity as the stored edge (a replay).
    Duplicate,
}

impl RejectReason {
    /// Short machine-readable label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Stale { .. } => "stale",
            RejectReason::Duplicate => "duplicate",
        }
    }
}

/// Result of [`EdgeStore::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The update is now the stored state of the pair.
    Applied {
        /// The edge it replaced, if the pair was known.
        previous: Option<Edge>,
    },
    /// The update was older than, or identical to, the stored state.
    Rejected(RejectReason),
}

impl UpsertOutcome {
    /// Whether the update was applied.
    pub const fn is_applied(&self) -> bool {
        matches!(self, UpsertOutcome::Applied { .. })
    }
}

type EdgeKey = (AccountId, AccountId);

/// Thread-safe map of directed edges `(truster, trustee) -> Edge`.
///
/// Upserts on the same pair are serialized by the map's entry lock; upserts
/// on different pairs proceed in parallel unless they share a shard.
pub struct EdgeStore {
    edges: DashMap<EdgeKey, Edge>,
    observers: Vec<Arc<dyn EdgeObserver>>,
    // Writers hold it shared; a snapshot holds it exclusively while copying.
    snapshot_gate: RwLock<()>,
}

impl EdgeStore {
    /// Create an empty store without observers.
    pub fn new() -> Self {
        Self::with_observers(Vec::new())
    }

    /// Create an empty store that notifies `observers` on every applied change.
    pub fn with_observers(observers: Vec<Arc<dyn EdgeObserver>>) -> Self {
        Self {
            edges: DashMap::new(),
            observers,
            snapshot_gate: RwLock::new(()),
        }
    }

    /// Insert or update the edge for `(line.truster, line.trustee)`.
    ///
    /// Applied when the pair is unknown, when `line.block_number` is newer
    /// than the stored block, or when it equals the stored block with a
    /// different capacity (a correction; the later arrival wins). Everything
    /// else is rejected.
    pub fn upsert(&self, line: &TrustLine) -> UpsertOutcome {
        let _writer = self
            .snapshot_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let key = (line.truster.clone(), line.trustee.clone());
        match self.edges.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(reason) = rejection(occupied.get(), line) {
                    return UpsertOutcome::Rejected(reason);
                }
                let edge = Edge::from(line);
                let previous = occupied.insert(edge.clone());
                self.notify(&edge);
                UpsertOutcome::Applied {
                    previous: Some(previous),
                }
            }
            Entry::Vacant(vacant) => {
                let edge = Edge::from(line);
                let _guard = vacant.insert(edge.clone());
                self.notify(&edge);
                UpsertOutcome::Applied { previous: None }
            }
        }
    }

    /// Fetch the stored edge for a pair.
    pub fn get(&self, truster: &AccountId, trustee: &AccountId) -> Option<Edge> {
        self.edges
            .get(&(truster.clone(), trustee.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Number of stored edge records, zero-capacity ones included.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether no edge has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Take a point-in-time copy of every stored edge.
    ///
    /// Writers are paused only while the map is copied; iterating the
    /// returned snapshot never blocks them.
    pub fn snapshot_all(&self) -> EdgeSnapshot {
        let mut edges: Vec<Edge> = {
            let _exclusive = self
                .snapshot_gate
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.edges.iter().map(|entry| entry.value().clone()).collect()
        };

        edges.sort_by(|a, b| {
            (a.last_block, &a.truster, &a.trustee).cmp(&(b.last_block, &b.truster, &b.trustee))
        });

        EdgeSnapshot {
            edges: Arc::from(edges),
        }
    }

    /// Re-derive `index` from the live edge map.
    ///
    /// Writers are paused for the whole rebuild, so no accepted change can be
    /// overwritten by an older view.
    pub fn rebuild_index(&self, index: &GraphIndex) {
        let _exclusive = self
            .snapshot_gate
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        index.clear();
        for entry in self.edges.iter() {
            index.apply(entry.value());
        }
    }

    fn notify(&self, edge: &Edge) {
        for observer in &self.observers {
            observer.on_edge_changed(edge);
        }
    }
}

impl Default for EdgeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EdgeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeStore")
            .field("edges", &self.edges.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn rejection(stored: &Edge, line: &TrustLine) -> Option<RejectReason> {
    match line.block_number.cmp(&stored.last_block) {
        Ordering::Less => Some(RejectReason::Stale {
            stored_block: stored.last_block,
        }),
        Ordering::Equal if line.amount == stored.capacity => Some(RejectReason::Duplicate),
        Ordering::Equal | Ordering::Greater => None,
    }
}

/// Immutable copy of the edge map, ordered by `(last_block, truster, trustee)`.
///
/// Cheap to clone; can be iterated any number of times.
#[derive(Debug, Clone)]
pub struct EdgeSnapshot {
    edges: Arc<[Edge]>,
}

impl EdgeSnapshot {
    /// Iterate the edges of this snapshot.
    pub fn iter(&self) -> std::slice::Iter<'_, Edge> {
        self.edges.iter()
    }

    /// Number of edges in the snapshot.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the snapshot holds no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl<'a> IntoIterator for &'a EdgeSnapshot {
    type Item = &'a Edge;
    type IntoIter = std::slice::Iter<'a, Edge>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
