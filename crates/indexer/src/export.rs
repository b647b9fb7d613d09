//! CSV export of the trust graph.
//!
//! One header line, then one row per edge:
//! `blockNumber,truster,truster_name,truster_image_url,trustee,trustee_name,trustee_image_url,amount`.
//! Missing names and image URLs are empty fields.

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use trustgraph_core::{Edge, Profile};
use trustgraph_engine::EdgeSnapshot;

use crate::enrichment::ProfileDirectory;

/// Header line, without the trailing newline.
pub const CSV_HEADER: &str =
    "blockNumber,truster,truster_name,truster_image_url,trustee,trustee_name,trustee_image_url,amount";

/// One CSV row for `edge`, newline-terminated.
pub fn csv_row(edge: &Edge, truster: &Profile, trustee: &Profile) -> String {
    let fields = [
        edge.last_block.to_string(),
        edge.truster.to_string(),
        field(truster.username.as_deref()),
        field(truster.avatar_url.as_deref()),
        edge.trustee.to_string(),
        field(trustee.username.as_deref()),
        field(trustee.avatar_url.as_deref()),
        edge.capacity.to_string(),
    ];
    let mut row = fields.join(",");
    row.push('\n');
    row
}

// Enrichment text is free-form; keep the column count intact.
fn field(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .chars()
        .map(|c| if c == ',' || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Write the header and every edge of `snapshot` to `writer`.
///
/// Zero-capacity edges are included. Returns the number of data rows.
pub async fn write_snapshot<W>(
    snapshot: &EdgeSnapshot,
    directory: &ProfileDirectory,
    writer: &mut W,
) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{}\n", CSV_HEADER).as_bytes())
        .await
        .context("Failed to write CSV header")?;

    let mut rows = 0;
    for edge in snapshot {
        let truster = directory.resolve(&edge.truster).await;
        let trustee = directory.resolve(&edge.trustee).await;
        writer
            .write_all(csv_row(edge, &truster, &trustee).as_bytes())
            .await
            .context("Failed to write CSV row")?;
        rows += 1;
    }

    writer.flush().await.context("Failed to flush CSV output")?;

    Ok(rows)
}
