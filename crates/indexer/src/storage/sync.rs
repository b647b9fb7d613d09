//! Sync state storage operations.

use anyhow::{Context, Result};
use sqlx::Row;

use super::Storage;

/// Ledger listener progress (single row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Chain the progress belongs to; 0 until initialized.
    pub chain_id: u64,
    /// Last block whose events were fully processed.
    pub last_block_number: u64,
    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

impl SyncState {
    /// Whether the row still holds its migration defaults.
    pub fn is_fresh(&self) -> bool {
        self.chain_id == 0 && self.last_block_number == 0
    }
}

impl Storage {
    pub async fn get_sync_state(&self) -> Result<SyncState> {
        let row = sqlx::query(
            r#"
            SELECT chain_id, last_block_number, updated_at
            FROM sync_state
            WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch sync state")?;

        Ok(SyncState {
            chain_id: row.get::<i64, _>("chain_id") as u64,
            last_block_number: row.get::<i64, _>("last_block_number") as u64,
            updated_at: row.get("updated_at"),
        })
    }

    pub async fn update_sync_state(&self, state: &SyncState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET chain_id = ?,
                last_block_number = ?,
                updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(state.chain_id as i64)
        .bind(state.last_block_number as i64)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update sync state")?;

        Ok(())
    }

    /// Record the chain and the block before which nothing is indexed.
    pub async fn initialize_sync_state(&self, chain_id: u64, start_block: u64) -> Result<()> {
        self.update_sync_state(&SyncState {
            chain_id,
            last_block_number: start_block,
            updated_at: chrono::Utc::now().timestamp(),
        })
        .await
        .context("Failed to initialize sync state")
    }
}
