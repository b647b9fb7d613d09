//! CSV file sink.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use trustgraph_core::{Edge, TrustLine};

use super::TrustLineSink;
use crate::enrichment::ProfileDirectory;
use crate::export::{csv_row, CSV_HEADER};

/// Appends one enriched CSV row per accepted trust line.
#[derive(Debug)]
pub struct FileExportSink {
    path: PathBuf,
    directory: ProfileDirectory,
    file: Mutex<File>,
}

impl FileExportSink {
    /// Open `path` for appending, writing the header if the file is new or empty.
    pub async fn open(path: impl AsRef<Path>, directory: ProfileDirectory) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open export file: {}", path.display()))?;

        let len = file
            .metadata()
            .await
            .with_context(|| format!("Failed to stat export file: {}", path.display()))?
            .len();
        if len == 0 {
            file.write_all(format!("{}\n", CSV_HEADER).as_bytes())
                .await
                .context("Failed to write CSV header")?;
            file.flush().await.context("Failed to flush CSV header")?;
        }

        info!("Exporting trust lines to {}", path.display());

        Ok(Self {
            path,
            directory,
            file: Mutex::new(file),
        })
    }
}

impl TrustLineSink for FileExportSink {
    async fn accept_trust_line(&self, line: &TrustLine) -> Result<()> {
        let truster = self.directory.resolve(&line.truster).await;
        let trustee = self.directory.resolve(&line.trustee).await;
        let row = csv_row(&Edge::from(line), &truster, &trustee);

        let mut file = self.file.lock().await;
        file.write_all(row.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        file.flush().await.context("Failed to flush export file")?;

        debug!(
            block = line.block_number,
            truster = %line.truster,
            trustee = %line.trustee,
            "Exported trust line"
        );

        Ok(())
    }
}
