//! Batched streaming of enriched records from a cache directory.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use protocolsio_shared::{Protocol, ProtocolsError, Result};
use protocolsio_storage::{decode_detail, is_detail_file};

/// Records per batch by default.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Up to `batch_size` decoded records.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub records: Vec<Protocol>,
    /// No batch follows this one.
    pub last: bool,
}

/// Lists a directory lazily and emits its `.detail` records in batches.
///
/// Every batch but the last is full; the final one is flagged `last`. A read
/// or decode error is sent down the queue and ends the stream.
#[derive(Debug, Clone)]
pub struct DirectoryStream {
    dir: PathBuf,
    batch_size: usize,
}

impl DirectoryStream {
    pub fn new(dir: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            dir: dir.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Produce batches into `tx` until the listing is exhausted.
    #[instrument(skip_all, fields(dir = %self.dir.display(), batch_size = self.batch_size))]
    pub async fn stream(self, tx: mpsc::Sender<Result<RecordBatch>>, cancel: CancellationToken) {
        if let Err(e) = self.produce(&tx, &cancel).await {
            debug!(error = %e, "directory stream ended with error");
            // The receiver may already be gone; nothing else to tell.
            let _ = tx.send(Err(e)).await;
        }
    }

    async fn produce(
        &self,
        tx: &mpsc::Sender<Result<RecordBatch>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| ProtocolsError::io(&self.dir, e))?;

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut sent = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProtocolsError::io(&self.dir, e))?
        {
            if cancel.is_cancelled() {
                return Err(ProtocolsError::Cancelled);
            }
            let name = entry.file_name();
            if !name.to_str().is_some_and(is_detail_file) {
                continue;
            }
            let path = entry.path();
            let buf = tokio::fs::read(&path)
                .await
                .map_err(|e| ProtocolsError::io(&path, e))?;
            let record = decode_detail(&buf, &path)?;

            // A full batch is held back until another record turns up, so
            // the terminal flag is always set on the true final batch.
            if batch.len() == self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                send(tx, cancel, RecordBatch { records: full, last: false }).await?;
                sent += 1;
            }
            batch.push(record);
        }

        if !batch.is_empty() {
            send(tx, cancel, RecordBatch { records: batch, last: true }).await?;
            sent += 1;
        }
        debug!(batches = sent, "directory exhausted");
        Ok(())
    }
}

async fn send(
    tx: &mpsc::Sender<Result<RecordBatch>>,
    cancel: &CancellationToken,
    batch: RecordBatch,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProtocolsError::Cancelled),
        sent = tx.send(Ok(batch)) => sent.map_err(|_| ProtocolsError::Cancelled),
    }
}
