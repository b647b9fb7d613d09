//! Engine error types.

use thiserror::Error;
use trustgraph_core::CoreError;

/// Errors surfaced by the graph engine.
///
/// Stale updates and missing paths are *not* errors; they are ordinary
/// outcomes ([`crate::UpsertOutcome::Rejected`], [`crate::QueryOutcome::Unreachable`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed address, negative amount or negative block number.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] CoreError),

    /// The caller cancelled the query before it finished.
    #[error("query cancelled")]
    Cancelled,

    /// The query ran past its deadline.
    #[error("query deadline exceeded")]
    DeadlineExceeded,
}
