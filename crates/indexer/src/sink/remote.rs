//! Sink forwarding trust lines to a remote trust graph service.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use trustgraph_core::TrustLine;

use super::TrustLineSink;

/// Header carrying the shared write secret.
pub const TCB_ID_HEADER: &str = "TCB-ID";

const BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Posts each line to `{base_url}/trust/{truster}/{trustee}/{amount}/{blockNumber}`.
///
/// Transport errors and 5xx responses are retried with exponential backoff;
/// any other non-success status fails immediately. A stale rejection from the
/// remote (200 `rejected`) counts as delivered.
#[derive(Debug, Clone)]
pub struct RemoteSink {
    client: Client,
    base_url: String,
    tcb_id: String,
    max_retries: u32,
    backoff: Duration,
}

impl RemoteSink {
    pub fn new(
        base_url: impl Into<String>,
        tcb_id: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("trustgraph-indexer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build remote sink HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tcb_id: tcb_id.into(),
            max_retries,
            backoff: BASE_BACKOFF,
        })
    }

    /// Override the first retry delay (doubles on every attempt).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn url_for(&self, line: &TrustLine) -> String {
        format!(
            "{}/trust/{}/{}/{}/{}",
            self.base_url, line.truster, line.trustee, line.amount, line.block_number
        )
    }

    async fn post_once(&self, url: &str) -> Result<StatusCode, reqwest::Error> {
        let response = self
            .client
            .post(url)
            .header(TCB_ID_HEADER, &self.tcb_id)
            .send()
            .await?;
        Ok(response.status())
    }
}

impl TrustLineSink for RemoteSink {
    async fn accept_trust_line(&self, line: &TrustLine) -> Result<()> {
        let url = self.url_for(line);
        let mut attempt = 0;

        loop {
            let failure = match self.post_once(&url).await {
                Ok(status) if status.is_success() => {
                    debug!(%url, status = status.as_u16(), "Forwarded trust line");
                    return Ok(());
                }
                Ok(status) if status.is_server_error() => format!("server error {}", status),
                Ok(status) => {
                    anyhow::bail!("Remote rejected trust line ({}): {}", status, url);
                }
                Err(e) => format!("transport error: {}", e),
            };

            if attempt >= self.max_retries {
                anyhow::bail!(
                    "Failed to forward trust line after {} attempts ({}): {}",
                    attempt + 1,
                    failure,
                    url
                );
            }

            let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
            warn!(
                %url,
                attempt = attempt + 1,
                "Forwarding failed ({}), retrying in {:?}",
                failure,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
