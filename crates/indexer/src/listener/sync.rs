//! Sync engine for historical and live block processing.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use trustgraph_core::{Stats, TrustLine};

use super::RpcProvider;
use crate::config::SyncConfig;
use crate::sink::TrustLineSink;
use crate::storage::{Storage, SyncState};

/// Shared view of how far the listener has come.
#[derive(Debug, Default)]
pub struct SyncProgress {
    latest_block: AtomicU64,
    current_block: AtomicU64,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::Acquire)
    }

    pub fn current_block(&self) -> u64 {
        self.current_block.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            latest_block: self.latest_block().to_string(),
            current_block: self.current_block().to_string(),
        }
    }

    fn record_synced(&self, block: u64) {
        self.latest_block.store(block, Ordering::Release);
    }

    fn record_head(&self, block: u64) {
        self.current_block.store(block, Ordering::Release);
    }
}

/// Whether `line` would replace `stored` under latest-wins.
fn supersedes(stored: Option<&TrustLine>, line: &TrustLine) -> bool {
    match stored {
        None => true,
        Some(stored) => {
            line.block_number > stored.block_number
                || (line.block_number == stored.block_number && line.amount != stored.amount)
        }
    }
}

/// Pulls `Trust` events from the ledger and hands accepted lines to a sink.
///
/// A line reaches the sink before it is stored; progress is recorded after
/// every event of a range has been handled. A sink failure therefore aborts
/// the range without losing the line, and the range is fetched again on the
/// next attempt.
pub struct SyncEngine<S> {
    provider: RpcProvider,
    storage: Storage,
    sink: S,
    config: SyncConfig,
    progress: Arc<SyncProgress>,
}

impl<S: TrustLineSink> SyncEngine<S> {
    pub fn new(provider: RpcProvider, storage: Storage, sink: S, config: SyncConfig) -> Self {
        Self {
            provider,
            storage,
            sink,
            config,
            progress: Arc::new(SyncProgress::new()),
        }
    }

    pub fn progress(&self) -> Arc<SyncProgress> {
        self.progress.clone()
    }

    /// Run the sync loop (historical + live).
    ///
    /// Failed iterations are logged and retried with capped exponential
    /// backoff, resuming from the persisted sync state. Returns only if the
    /// initial sync state cannot be read.
    pub async fn run(&self) -> Result<()> {
        info!("Sync engine starting...");

        let state = self.storage.get_sync_state().await?;
        self.progress.record_synced(state.last_block_number);

        let mut failures: u32 = 0;
        loop {
            match self.sync_once().await {
                Ok(caught_up) => {
                    if failures > 0 {
                        info!("Sync recovered after {} failed attempts", failures);
                        failures = 0;
                    }
                    if caught_up {
                        tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs))
                            .await;
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.retry_delay(failures);
                    warn!(
                        attempt = failures,
                        "Sync iteration failed, retrying in {:?}: {:#}", delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One pass: sync the next batch if there is one. Returns whether the
    /// engine is caught up with the safe head.
    async fn sync_once(&self) -> Result<bool> {
        let state = self.storage.get_sync_state().await?;
        let current_block = self.provider.get_block_number().await?;
        self.progress.record_head(current_block);

        let safe_block = current_block.saturating_sub(self.config.confirmations);
        let last_synced = state.last_block_number;
        let blocks_behind = safe_block.saturating_sub(last_synced);

        debug!(
            "Sync status: last={}, current={}, safe={}",
            last_synced, current_block, safe_block
        );

        if blocks_behind == 0 {
            return Ok(true);
        }

        let batch_end = last_synced
            .saturating_add(self.config.batch_size)
            .min(safe_block);
        self.sync_range(state, last_synced + 1, batch_end).await?;

        Ok(blocks_behind <= self.config.batch_size)
    }

    /// Process blocks `from..=to` and record `to` as synced.
    async fn sync_range(&self, mut state: SyncState, from: u64, to: u64) -> Result<()> {
        let events = self
            .provider
            .get_trust_events(from, to)
            .await
            .with_context(|| format!("Failed to fetch logs for blocks {} to {}", from, to))?;

        let mut forwarded = 0;
        let mut skipped = 0;

        for event in events {
            let line = match event.to_trust_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!(block = event.block_number, "Skipping Trust event: {:#}", e);
                    continue;
                }
            };
            if self.handle_line(&line).await? {
                forwarded += 1;
            } else {
                skipped += 1;
            }
        }

        info!(
            "Blocks {}..={}: {} trust lines forwarded, {} skipped (stale)",
            from, to, forwarded, skipped
        );

        state.last_block_number = to;
        state.updated_at = chrono::Utc::now().timestamp();
        self.storage.update_sync_state(&state).await?;
        self.progress.record_synced(to);

        Ok(())
    }

    /// Deliver `line` if it supersedes the stored state. Returns whether it did.
    pub async fn handle_line(&self, line: &TrustLine) -> Result<bool> {
        let stored = self
            .storage
            .get_trust_line(&line.truster, &line.trustee)
            .await?;
        if !supersedes(stored.as_ref(), line) {
            debug!(
                truster = %line.truster,
                trustee = %line.trustee,
                block = line.block_number,
                "Skipping stale trust line"
            );
            return Ok(false);
        }

        self.sink
            .accept_trust_line(line)
            .await
            .context("Sink rejected trust line")?;
        self.storage.upsert_trust_line(line).await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Log as PrimitiveLog, U256};
    use alloy::rpc::types::Log;
    use alloy::sol_types::SolEvent;
    use axum::{routing::post, Json, Router};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    use crate::listener::events::Trust;

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<TrustLine>>,
        fail: bool,
    }

    impl TrustLineSink for RecordingSink {
        async fn accept_trust_line(&self, line: &TrustLine) -> Result<()> {
            if self.fail {
                anyhow::bail!("sink down");
            }
            self.lines.lock().unwrap().push(line.clone());
            Ok(())
        }
    }

    fn line(truster: &str, trustee: &str, amount: i128, block: i128) -> TrustLine {
        TrustLine::from_parts(truster, trustee, amount, block).unwrap()
    }

    async fn engine(sink: RecordingSink) -> (SyncEngine<RecordingSink>, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        let provider =
            RpcProvider::new("http://127.0.0.1:9", alloy::primitives::Address::ZERO).unwrap();
        (
            SyncEngine::new(provider, storage, sink, SyncConfig::default()),
            temp_db,
        )
    }

    #[test]
    fn test_supersedes() {
        let stored = line("A", "B", 10, 5);
        assert!(supersedes(None, &stored));
        assert!(supersedes(Some(&stored), &line("A", "B", 1, 6)));
        assert!(supersedes(Some(&stored), &line("A", "B", 11, 5)));
        assert!(!supersedes(Some(&stored), &line("A", "B", 10, 5)));
        assert!(!supersedes(Some(&stored), &line("A", "B", 99, 4)));
    }

    #[tokio::test]
    async fn test_handle_line_forwards_only_newer_lines() {
        let (engine, _temp) = engine(RecordingSink::default()).await;

        assert!(engine.handle_line(&line("A", "B", 10, 5)).await.unwrap());
        assert!(!engine.handle_line(&line("A", "B", 3, 4)).await.unwrap());
        assert!(!engine.handle_line(&line("A", "B", 10, 5)).await.unwrap());
        assert!(engine.handle_line(&line("A", "B", 0, 6)).await.unwrap());

        let delivered = engine.sink.lines.lock().unwrap().clone();
        assert_eq!(delivered, vec![line("A", "B", 10, 5), line("A", "B", 0, 6)]);
        assert_eq!(engine.storage.count_trust_lines().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_leaves_storage_untouched() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let (engine, _temp) = engine(sink).await;

        assert!(engine.handle_line(&line("A", "B", 10, 5)).await.is_err());
        assert_eq!(engine.storage.count_trust_lines().await.unwrap(), 0);
    }

    #[test]
    fn test_progress_stats() {
        let progress = SyncProgress::new();
        progress.record_synced(41);
        progress.record_head(45);
        let stats = progress.stats();
        assert_eq!(stats.latest_block, "41");
        assert_eq!(stats.current_block, "45");
    }

    const HEAD: u64 = 16;
    const EVENT_BLOCK: u64 = 5;

    fn trust_log() -> Log {
        let event = Trust {
            canSendTo: Address::repeat_byte(0x01),
            user: Address::repeat_byte(0x02),
            limit: U256::from(40),
        };
        Log {
            inner: PrimitiveLog {
                address: Address::ZERO,
                data: event.encode_log_data(),
            },
            block_number: Some(EVENT_BLOCK),
            log_index: Some(0),
            ..Default::default()
        }
    }

    // Minimal JSON-RPC node: a fixed head and one Trust log.
    async fn fake_node(Json(request): Json<serde_json::Value>) -> Json<serde_json::Value> {
        let result = match request["method"].as_str() {
            Some("eth_blockNumber") => serde_json::json!(format!("{:#x}", HEAD)),
            Some("eth_getLogs") => serde_json::json!([trust_log()]),
            _ => {
                return Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "error": { "code": -32601, "message": "method not found" },
                }))
            }
        };
        Json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": result,
        }))
    }

    /// Fails the first `failures` deliveries, then records.
    struct FlakySink {
        failures_left: AtomicU32,
        attempts: Arc<AtomicU32>,
        lines: Arc<Mutex<Vec<TrustLine>>>,
    }

    impl TrustLineSink for FlakySink {
        async fn accept_trust_line(&self, line: &TrustLine) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                anyhow::bail!("remote unavailable");
            }
            self.lines.lock().unwrap().push(line.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_retries_failed_delivery() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/", post(fake_node)))
                .await
                .unwrap();
        });

        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        storage.initialize_sync_state(100, 0).await.unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = FlakySink {
            failures_left: AtomicU32::new(2),
            attempts: attempts.clone(),
            lines: lines.clone(),
        };
        let config = SyncConfig {
            confirmations: 0,
            retry_base_ms: 10,
            retry_max_secs: 1,
            ..Default::default()
        };
        let provider = RpcProvider::new(&format!("http://{}", addr), Address::ZERO).unwrap();
        let engine = SyncEngine::new(provider, storage.clone(), sink, config);

        let synced = async {
            loop {
                if storage.get_sync_state().await.unwrap().last_block_number == HEAD {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        tokio::select! {
            result = engine.run() => panic!("sync engine stopped: {:?}", result),
            _ = tokio::time::timeout(Duration::from_secs(10), synced) => {}
        }

        assert_eq!(engine.progress().latest_block(), HEAD);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let expected = TrustLine::new(
            trustgraph_core::account_from_address(&Address::repeat_byte(0x01)),
            trustgraph_core::account_from_address(&Address::repeat_byte(0x02)),
            40,
            EVENT_BLOCK as i128,
        )
        .unwrap();
        assert_eq!(*lines.lock().unwrap(), vec![expected.clone()]);
        let stored = storage
            .get_trust_line(&expected.truster, &expected.trustee)
            .await
            .unwrap();
        assert_eq!(stored, Some(expected));
    }
}
