//! Trust line storage operations.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use trustgraph_core::{AccountId, TrustLine};

use super::Storage;

impl Storage {
    /// Upsert a trust line with latest-wins semantics.
    ///
    /// The row is replaced when the incoming block is newer, or equal with a
    /// different amount. Returns `true` if inserted or updated, `false` if
    /// stale or a replay.
    pub async fn upsert_trust_line(&self, line: &TrustLine) -> Result<bool> {
        let block_number = i64::try_from(line.block_number)
            .with_context(|| format!("Block number {} exceeds storage range", line.block_number))?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO trust_lines (truster, trustee, amount, block_number, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(truster, trustee)
            DO UPDATE SET
                amount = excluded.amount,
                block_number = excluded.block_number,
                updated_at = excluded.updated_at
            WHERE excluded.block_number > trust_lines.block_number
               OR (excluded.block_number = trust_lines.block_number AND excluded.amount <> trust_lines.amount)
            "#,
        )
        .bind(line.truster.as_str())
        .bind(line.trustee.as_str())
        .bind(line.amount.to_string())
        .bind(block_number)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to upsert trust line")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch the stored line for a pair.
    pub async fn get_trust_line(
        &self,
        truster: &AccountId,
        trustee: &AccountId,
    ) -> Result<Option<TrustLine>> {
        let row = sqlx::query(
            r#"
            SELECT truster, trustee, amount, block_number
            FROM trust_lines
            WHERE truster = ? AND trustee = ?
            "#,
        )
        .bind(truster.as_str())
        .bind(trustee.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch trust line")?;

        row.map(|row| Self::row_to_trust_line(&row)).transpose()
    }

    /// Every stored line, ordered by block number.
    pub async fn all_trust_lines(&self) -> Result<Vec<TrustLine>> {
        let rows = sqlx::query(
            r#"
            SELECT truster, trustee, amount, block_number
            FROM trust_lines
            ORDER BY block_number ASC, truster ASC, trustee ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trust lines")?;

        rows.iter().map(Self::row_to_trust_line).collect()
    }

    pub async fn count_trust_lines(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trust_lines")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count trust lines")?;

        Ok(count as u64)
    }

    fn row_to_trust_line(row: &SqliteRow) -> Result<TrustLine> {
        let truster: String = row.get("truster");
        let trustee: String = row.get("trustee");
        let amount: String = row.get("amount");
        let block_number: i64 = row.get("block_number");

        let amount: u64 = amount
            .parse()
            .with_context(|| format!("Corrupt amount '{}' for {} -> {}", amount, truster, trustee))?;

        TrustLine::from_parts(&truster, &trustee, i128::from(amount), i128::from(block_number))
            .with_context(|| format!("Corrupt trust line {} -> {}", truster, trustee))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn setup() -> (Storage, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp_db)
    }

    fn line(truster: &str, trustee: &str, amount: i128, block: i128) -> TrustLine {
        TrustLine::from_parts(truster, trustee, amount, block).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_latest_wins() {
        let (storage, _temp) = setup().await;

        assert!(storage.upsert_trust_line(&line("A", "B", 10, 5)).await.unwrap());
        // Older block is ignored.
        assert!(!storage.upsert_trust_line(&line("A", "B", 3, 4)).await.unwrap());
        // Replay is ignored.
        assert!(!storage.upsert_trust_line(&line("A", "B", 10, 5)).await.unwrap());
        // Same block, different amount is a correction.
        assert!(storage.upsert_trust_line(&line("A", "B", 12, 5)).await.unwrap());
        // Newer block wins, zero included.
        assert!(storage.upsert_trust_line(&line("A", "B", 0, 9)).await.unwrap());

        let a = AccountId::new("A").unwrap();
        let b = AccountId::new("B").unwrap();
        let stored = storage.get_trust_line(&a, &b).await.unwrap().unwrap();
        assert_eq!(stored.amount, 0);
        assert_eq!(stored.block_number, 9);
        assert_eq!(storage.count_trust_lines().await.unwrap(), 1);

        assert!(storage.get_trust_line(&b, &a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_amount_range_round_trips() {
        let (storage, _temp) = setup().await;

        storage
            .upsert_trust_line(&line("A", "B", i128::from(u64::MAX), 1))
            .await
            .unwrap();

        let lines = storage.all_trust_lines().await.unwrap();
        assert_eq!(lines[0].amount, u64::MAX);
    }

    #[tokio::test]
    async fn test_all_trust_lines_ordered_by_block() {
        let (storage, _temp) = setup().await;

        storage.upsert_trust_line(&line("C", "D", 1, 7)).await.unwrap();
        storage.upsert_trust_line(&line("A", "B", 1, 3)).await.unwrap();
        storage.upsert_trust_line(&line("B", "C", 1, 5)).await.unwrap();

        let blocks: Vec<u64> = storage
            .all_trust_lines()
            .await
            .unwrap()
            .iter()
            .map(|l| l.block_number)
            .collect();
        assert_eq!(blocks, vec![3, 5, 7]);
    }
}
