//! Validation and bookkeeping in front of the [`EdgeStore`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use trustgraph_core::TrustLine;

use crate::error::EngineError;
use crate::store::{EdgeStore, UpsertOutcome};

/// Counters maintained by the [`IngestionPipeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Updates that changed the stored state.
    pub applied: u64,
    /// Stale or duplicate updates.
    pub rejected: u64,
    /// Highest block among applied updates, if any.
    pub latest_block: Option<u64>,
}

/// Accepts trust line updates from any number of producers.
///
/// Validation happens here; ordering is enforced by the store. Updates for
/// different pairs can be submitted concurrently.
#[derive(Debug)]
pub struct IngestionPipeline {
    store: Arc<EdgeStore>,
    applied: AtomicU64,
    rejected: AtomicU64,
    latest_block: AtomicU64,
    // Set once `latest_block` holds an applied block.
    block_seen: AtomicBool,
}

impl IngestionPipeline {
    pub fn new(store: Arc<EdgeStore>) -> Self {
        Self {
            store,
            applied: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            latest_block: AtomicU64::new(0),
            block_seen: AtomicBool::new(false),
        }
    }

    /// Validate raw inputs and hand the update to the store.
    ///
    /// Malformed input is an [`EngineError::InvalidArgument`]; a stale or
    /// duplicate update is a successful call returning
    /// [`UpsertOutcome::Rejected`].
    pub fn submit(
        &self,
        truster: &str,
        trustee: &str,
        amount: i128,
        block_number: i128,
    ) -> Result<UpsertOutcome, EngineError> {
        let line = TrustLine::from_parts(truster, trustee, amount, block_number)?;
        Ok(self.submit_line(&line))
    }

    /// Hand an already-validated update to the store.
    pub fn submit_line(&self, line: &TrustLine) -> UpsertOutcome {
        let outcome = self.store.upsert(line);
        match &outcome {
            UpsertOutcome::Applied { .. } => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                self.record_block(line.block_number);
            }
            UpsertOutcome::Rejected(reason) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    truster = %line.truster,
                    trustee = %line.trustee,
                    block = line.block_number,
                    reason = reason.as_str(),
                    "Trust line update rejected"
                );
            }
        }
        outcome
    }

    pub fn stats(&self) -> IngestStats {
        let seen = self.block_seen.load(Ordering::Acquire);
        IngestStats {
            applied: self.applied.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            latest_block: seen.then(|| self.latest_block.load(Ordering::Acquire)),
        }
    }

    pub fn store(&self) -> &Arc<EdgeStore> {
        &self.store
    }

    fn record_block(&self, block: u64) {
        self.latest_block.fetch_max(block, Ordering::AcqRel);
        // Published after the max so a reader that sees the flag sees the block.
        self.block_seen.store(true, Ordering::Release);
    }
}
