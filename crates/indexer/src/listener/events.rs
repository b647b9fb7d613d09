//! Hub `Trust` event definitions.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use trustgraph_core::{account_from_address, TrustLine};

sol! {
    /// Emitted by the hub whenever a trust limit is set.
    ///
    /// `canSendTo` accepts tokens of `user` up to `limit`.
    #[derive(Debug, PartialEq, Eq)]
    event Trust(
        address indexed canSendTo,
        address indexed user,
        uint256 limit
    );
}

/// Decoded `Trust` event with its block coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEvent {
    /// Party accepting trust (`canSendTo`)
    pub truster: Address,

    /// Party being trusted (`user`)
    pub trustee: Address,

    /// Trust limit
    pub limit: U256,

    /// Block number where the event occurred
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,
}

impl TrustEvent {
    /// Parse a `Trust` event from an RPC log.
    pub fn from_log(log: &Log) -> Result<Self> {
        let event = Trust::decode_log(log.as_ref(), true).context("Failed to decode Trust event")?;

        let block_number = log.block_number.context("Log missing block_number")?;
        let log_index = log.log_index.context("Log missing log_index")?;

        Ok(Self {
            truster: event.canSendTo,
            trustee: event.user,
            limit: event.limit,
            block_number,
            log_index,
        })
    }

    /// Convert to a trust line with checksummed addresses.
    pub fn to_trust_line(&self) -> Result<TrustLine> {
        let amount = u64::try_from(self.limit)
            .map_err(|_| anyhow::anyhow!("Trust limit {} exceeds u64", self.limit))?;

        Ok(TrustLine {
            truster: account_from_address(&self.truster),
            trustee: account_from_address(&self.trustee),
            amount,
            block_number: self.block_number,
        })
    }
}
