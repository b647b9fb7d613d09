//! Trust graph engine.
//!
//! In-memory directed graph of trust lines with capacity-constrained
//! reachability queries:
//! - [`EdgeStore`] keeps the latest accepted state per `(truster, trustee)`
//! - [`GraphIndex`] mirrors the store as per-node adjacency lists
//! - [`PathQueryEngine`] runs threshold-pruned breadth-first searches
//! - [`IngestionPipeline`] validates updates and keeps counters
//!
//! [`TrustGraph`] wires them together.

pub mod error;
pub mod index;
pub mod ingest;
pub mod query;
pub mod store;

use std::sync::Arc;
use trustgraph_core::{AccountId, Edge, TrustLine};

pub use error::EngineError;
pub use index::GraphIndex;
pub use ingest::{IngestStats, IngestionPipeline};
pub use query::{PathQueryEngine, QueryControl, QueryOutcome, QueryStats, TrustPath};
pub use store::{EdgeObserver, EdgeSnapshot, EdgeStore, RejectReason, UpsertOutcome};

/// The store, its index and the query engine behind one handle.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct TrustGraph {
    pipeline: IngestionPipeline,
    index: Arc<GraphIndex>,
    queries: PathQueryEngine,
}

impl TrustGraph {
    pub fn new() -> Self {
        let index = Arc::new(GraphIndex::new());
        let store = Arc::new(EdgeStore::with_observers(vec![
            index.clone() as Arc<dyn EdgeObserver>
        ]));
        Self {
            pipeline: IngestionPipeline::new(store),
            queries: PathQueryEngine::new(index.clone()),
            index,
        }
    }

    /// Record that `truster` accepts up to `amount` from `trustee` as of
    /// `block_number`.
    pub fn add_trust_line(
        &self,
        truster: &str,
        trustee: &str,
        amount: i128,
        block_number: i128,
    ) -> Result<UpsertOutcome, EngineError> {
        self.pipeline.submit(truster, trustee, amount, block_number)
    }

    /// Apply an already-validated update.
    pub fn apply(&self, line: &TrustLine) -> UpsertOutcome {
        self.pipeline.submit_line(line)
    }

    /// Path of addresses from `truster` to `trustee` with every edge
    /// carrying at least `amount`, or an empty list when there is none.
    pub fn find_trust_graph(
        &self,
        truster: &AccountId,
        trustee: &AccountId,
        amount: i128,
        control: &QueryControl,
    ) -> Result<Vec<AccountId>, EngineError> {
        match self.query(truster, trustee, amount, control)? {
            QueryOutcome::Reachable(path) => Ok(path.nodes),
            QueryOutcome::Unreachable => Ok(Vec::new()),
            QueryOutcome::Cancelled => Err(EngineError::Cancelled),
            QueryOutcome::DeadlineExceeded => Err(EngineError::DeadlineExceeded),
        }
    }

    pub fn query(
        &self,
        truster: &AccountId,
        trustee: &AccountId,
        amount: i128,
        control: &QueryControl,
    ) -> Result<QueryOutcome, EngineError> {
        self.queries.query(truster, trustee, amount, control)
    }

    /// Consistent copy of every stored edge, zero-capacity ones included.
    pub fn snapshot_all(&self) -> EdgeSnapshot {
        self.pipeline.store().snapshot_all()
    }

    pub fn edge(&self, truster: &AccountId, trustee: &AccountId) -> Option<Edge> {
        self.pipeline.store().get(truster, trustee)
    }

    /// Passable outgoing edges of `node`.
    pub fn neighbors(&self, node: &AccountId) -> Vec<(AccountId, u64)> {
        self.index.neighbors(node)
    }

    /// Rebuild the adjacency index from the store.
    pub fn rebuild_index(&self) {
        self.pipeline.store().rebuild_index(&self.index);
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.pipeline.stats()
    }

    /// Number of stored edge records.
    pub fn edge_count(&self) -> usize {
        self.pipeline.store().len()
    }
}

impl Default for TrustGraph {
    fn default() -> Self {
        Self::new()
    }
}
