//! Capacity-constrained reachability queries.
//!
//! A query asks whether `truster` can reach `trustee` through edges that
//! each carry at least `amount`. That is a widest-path feasibility test
//! with a fixed threshold, so a breadth-first search over the pruned
//! subgraph (edges with `capacity >= amount`) is enough:
//! - a node is enqueued the first time it is discovered, never again
//! - edges below the threshold are never expanded
//! - work is `O(V + E)` of the pruned subgraph
//!
//! The search consults the [`GraphIndex`] one node at a time and holds no
//! lock across the traversal, so concurrent writes may be observed
//! part-way through a query.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use trustgraph_core::{AccountId, CoreError};

use crate::error::EngineError;
use crate::index::GraphIndex;

/// Caller-supplied cancellation signal and deadline for a query.
#[derive(Debug, Clone, Default)]
pub struct QueryControl {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl QueryControl {
    /// No cancellation, no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Abort once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort after `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    fn interruption(&self) -> Option<QueryOutcome> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some(QueryOutcome::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(QueryOutcome::DeadlineExceeded);
        }
        None
    }
}

/// A satisfying path, truster first and trustee last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPath {
    /// Nodes along the path.
    pub nodes: Vec<AccountId>,
    /// Smallest edge capacity on the path; `None` when no edge was traversed.
    pub bottleneck: Option<u64>,
}

/// Outcome of a reachability query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// A path with bottleneck capacity at or above the amount exists.
    Reachable(TrustPath),
    /// No such path exists.
    Unreachable,
    /// The cancellation token fired before the search finished.
    Cancelled,
    /// The deadline passed before the search finished.
    DeadlineExceeded,
}

/// Work done by a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Nodes dequeued and expanded.
    pub visited_nodes: usize,
    /// Edges at or above the threshold that were examined.
    pub examined_edges: usize,
}

/// Threshold-pruned breadth-first search over a [`GraphIndex`].
#[derive(Debug, Clone)]
pub struct PathQueryEngine {
    index: Arc<GraphIndex>,
}

impl PathQueryEngine {
    /// Create a query engine reading from `index`.
    pub fn new(index: Arc<GraphIndex>) -> Self {
        Self { index }
    }

    /// Find a path from `truster` to `trustee` whose every edge carries at
    /// least `amount`.
    ///
    /// A node that appears in no edge is not an error; the answer is simply
    /// [`QueryOutcome::Unreachable`]. When `truster == trustee` the answer is
    /// reachable without traversal only for `amount == 0`; otherwise a real
    /// cycle back to the truster is required.
    pub fn query(
        &self,
        truster: &AccountId,
        trustee: &AccountId,
        amount: i128,
        control: &QueryControl,
    ) -> Result<QueryOutcome, EngineError> {
        self.query_with_stats(truster, trustee, amount, control)
            .map(|(outcome, _)| outcome)
    }

    /// Same as [`PathQueryEngine::query`], also reporting the work done.
    pub fn query_with_stats(
        &self,
        truster: &AccountId,
        trustee: &AccountId,
        amount: i128,
        control: &QueryControl,
    ) -> Result<(QueryOutcome, QueryStats), EngineError> {
        if amount < 0 {
            return Err(CoreError::NegativeAmount(amount).into());
        }
        let mut stats = QueryStats::default();

        // No edge can carry more than u64::MAX.
        let Ok(threshold) = u64::try_from(amount) else {
            return Ok((QueryOutcome::Unreachable, stats));
        };

        if truster == trustee && threshold == 0 {
            let path = TrustPath {
                nodes: vec![truster.clone()],
                bottleneck: None,
            };
            return Ok((QueryOutcome::Reachable(path), stats));
        }

        let mut visited: HashSet<AccountId> = HashSet::from([truster.clone()]);
        // child -> (parent, capacity of parent -> child)
        let mut parents: HashMap<AccountId, (AccountId, u64)> = HashMap::new();
        let mut queue: VecDeque<AccountId> = VecDeque::from([truster.clone()]);

        while let Some(node) = queue.pop_front() {
            if let Some(interrupted) = control.interruption() {
                return Ok((interrupted, stats));
            }
            stats.visited_nodes += 1;

            for (next, capacity) in self.index.neighbors_at_least(&node, threshold) {
                stats.examined_edges += 1;

                // Checked before `visited` so a cycle back to the truster counts.
                if next == *trustee {
                    let path = reconstruct(&parents, &node, next, capacity);
                    return Ok((QueryOutcome::Reachable(path), stats));
                }

                if visited.insert(next.clone()) {
                    parents.insert(next.clone(), (node.clone(), capacity));
                    queue.push_back(next);
                }
            }
        }

        Ok((QueryOutcome::Unreachable, stats))
    }
}

fn reconstruct(
    parents: &HashMap<AccountId, (AccountId, u64)>,
    last: &AccountId,
    target: AccountId,
    last_capacity: u64,
) -> TrustPath {
    let mut nodes = vec![target, last.clone()];
    let mut bottleneck = last_capacity;
    let mut cursor = last;

    while let Some((parent, capacity)) = parents.get(cursor) {
        bottleneck = bottleneck.min(*capacity);
        nodes.push(parent.clone());
        cursor = parent;
    }

    nodes.reverse();
    TrustPath {
        nodes,
        bottleneck: Some(bottleneck),
    }
}
