//! Consumers of harvested pages.
//!
//! The harvest loop hands each [`HarvestedPage`] to an [`ItemProcessor`].
//! [`Printer`] lists items to a writer; [`Saver`] persists them together with
//! their enriched records and a checkpoint.

use std::io::Write;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use protocolsio_client::PageFetcher;
use protocolsio_shared::{ListedProtocol, ProtocolsError, Result};
use protocolsio_storage::ArtifactStore;

use crate::checkpoint::Checkpoint;

/// One list page after cap truncation, with the checkpoint recorded for it.
#[derive(Debug, Clone)]
pub struct HarvestedPage {
    pub items: Vec<Value>,
    pub extras: Value,
    pub checkpoint: Checkpoint,
}

/// Handles every page a harvest produces, in order.
///
/// An error from `process` ends the harvest.
#[async_trait]
pub trait ItemProcessor: Send {
    async fn process(&mut self, page: HarvestedPage, cancel: &CancellationToken) -> Result<()>;
}

fn listed(item: &Value) -> Result<ListedProtocol> {
    serde_json::from_value(item.clone())
        .map_err(|e| ProtocolsError::decode(format!("list item: {e}")))
}

// ---------------------------------------------------------------------------
// Printer
// ---------------------------------------------------------------------------

/// Writes one summary line per item.
pub struct Printer<W> {
    out: W,
}

impl Printer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Printer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// `<id>: URI: <uri>, Title: <title>`
pub fn summary_line(protocol: &ListedProtocol) -> String {
    format!(
        "{}: URI: {}, Title: {}",
        protocol.id, protocol.uri, protocol.title
    )
}

#[async_trait]
impl<W: Write + Send> ItemProcessor for Printer<W> {
    async fn process(&mut self, page: HarvestedPage, _cancel: &CancellationToken) -> Result<()> {
        for item in &page.items {
            match listed(item) {
                Ok(protocol) => writeln!(self.out, "{}", summary_line(&protocol))
                    .map_err(|e| ProtocolsError::io("<output>", e))?,
                Err(e) => warn!(error = %e, "skipping undecodable item"),
            }
        }
        self.out
            .flush()
            .map_err(|e| ProtocolsError::io("<output>", e))
    }
}

// ---------------------------------------------------------------------------
// Saver
// ---------------------------------------------------------------------------

/// Contents of a `.list` file.
#[derive(Serialize)]
struct ListEntry<'a> {
    extras: &'a Value,
    item: &'a Value,
}

/// What happened to a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Saved {
    Downloaded,
    Current,
}

/// Persists items and their enriched records, then the page checkpoint.
///
/// The checkpoint is only written once every item of the page was saved, so
/// resuming from the newest checkpoint never skips a failed item.
pub struct Saver {
    store: ArtifactStore,
    fetcher: PageFetcher,
    downloaded: u64,
    current: u64,
}

impl Saver {
    pub fn new(store: ArtifactStore, fetcher: PageFetcher) -> Self {
        Self {
            store,
            fetcher,
            downloaded: 0,
            current: 0,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Enriched records fetched so far.
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Items skipped because the stored record was already up to date.
    pub fn up_to_date(&self) -> u64 {
        self.current
    }

    async fn save_item(
        &self,
        item: &Value,
        extras: &Value,
        checkpoint: &mut Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<Saved> {
        let protocol = listed(item)?;
        let list_file = ArtifactStore::list_filename(protocol.id);
        checkpoint.push_file(list_file.clone());
        self.store
            .write_json(&list_file, &ListEntry { extras, item })?;

        match self.store.stored_version(protocol.id)? {
            Some(stored) if stored >= protocol.version_id => {
                debug!(id = protocol.id, version = stored, "enriched record is current");
                return Ok(Saved::Current);
            }
            _ => {}
        }

        let fetched = self.fetcher.fetch_item(protocol.id, cancel).await?;
        self.store
            .write(&ArtifactStore::detail_filename(protocol.id), &fetched.body)?;
        Ok(Saved::Downloaded)
    }
}

#[async_trait]
impl ItemProcessor for Saver {
    #[instrument(skip_all, fields(page = page.checkpoint.current_page, items = page.items.len()))]
    async fn process(&mut self, page: HarvestedPage, cancel: &CancellationToken) -> Result<()> {
        let HarvestedPage {
            items,
            extras,
            mut checkpoint,
        } = page;
        checkpoint.reset_files();

        let mut errors = Vec::new();
        for item in &items {
            if cancel.is_cancelled() {
                return Err(ProtocolsError::Cancelled);
            }
            match self.save_item(item, &extras, &mut checkpoint, cancel).await {
                Ok(Saved::Downloaded) => self.downloaded += 1,
                Ok(Saved::Current) => self.current += 1,
                Err(ProtocolsError::Cancelled) => return Err(ProtocolsError::Cancelled),
                Err(e) => {
                    warn!(error = %e, "failed to save item");
                    errors.push(e);
                }
            }
        }
        if !errors.is_empty() {
            return Err(ProtocolsError::PageFailed {
                page: checkpoint.current_page,
                errors,
            });
        }

        if cancel.is_cancelled() {
            return Err(ProtocolsError::Cancelled);
        }
        checkpoint.written_at = Some(Utc::now());
        let path = self.store.write_json(&checkpoint.filename(), &checkpoint)?;
        info!(checkpoint = %path.display(), "page saved");
        Ok(())
    }
}
