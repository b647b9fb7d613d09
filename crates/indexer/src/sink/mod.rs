//! Destinations for accepted trust lines.
//!
//! The sync engine is generic over [`TrustLineSink`]; the adapter is picked
//! once at startup from `[sink] kind`.

use anyhow::Result;
use std::future::Future;
use trustgraph_core::TrustLine;

pub mod file;
pub mod remote;

pub use file::FileExportSink;
pub use remote::RemoteSink;

/// Receives every trust line the indexer accepts, in ledger order.
pub trait TrustLineSink: Send + Sync {
    /// Deliver one line. An error stops the sync loop before progress is
    /// recorded, so the line is delivered again on the next attempt.
    fn accept_trust_line(&self, line: &TrustLine) -> impl Future<Output = Result<()>> + Send;
}
