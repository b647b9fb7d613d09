//! RPC provider wrapper for Ethereum communication.

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};

use super::events::{Trust, TrustEvent};

/// HTTP RPC provider for querying the hub contract.
#[derive(Clone)]
pub struct RpcProvider {
    provider: RootProvider<Http<Client>>,
    hub_address: Address,
}

impl RpcProvider {
    /// Create a new RPC provider.
    pub fn new(rpc_url: &str, hub_address: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            provider,
            hub_address,
        })
    }

    /// Get the latest block number.
    pub async fn get_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    /// Get `Trust` events for an inclusive block range, in log order.
    pub async fn get_trust_events(&self, from_block: u64, to_block: u64) -> Result<Vec<TrustEvent>> {
        let filter = Filter::new()
            .address(self.hub_address)
            .event_signature(Trust::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs: Vec<Log> = self
            .provider
            .get_logs(&filter)
            .await
            .context("Failed to fetch logs from RPC")?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match TrustEvent::from_log(log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // Skip the log, keep the batch.
                    tracing::warn!("Failed to parse Trust event: {}", e);
                }
            }
        }
        events.sort_by_key(|event| (event.block_number, event.log_index));

        Ok(events)
    }
}

impl std::fmt::Debug for RpcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcProvider")
            .field("hub_address", &self.hub_address)
            .finish()
    }
}
