//! The paginated harvest loop.
//!
//! A fetch task walks the list endpoint page by page and pushes each page
//! into a bounded queue; the caller's task drains the queue into an
//! [`ItemProcessor`]. Fetching stops at the first of:
//!
//! 1. the item cap (`total`) being reached, truncating the last page;
//! 2. the server reporting the final page;
//! 3. the requested page range being exhausted (only without an item cap).

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use protocolsio_client::PageFetcher;
use protocolsio_shared::{ProgressReporter, ProtocolsError, Result};

use crate::checkpoint::{Advance, Checkpoint};
use crate::processor::{HarvestedPage, ItemProcessor};

/// Pages buffered between the fetch task and the processor by default.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Outcome of a completed harvest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub pages: usize,
    pub items: usize,
    pub elapsed: Duration,
}

/// Drives a harvest from a [`Checkpoint`].
#[derive(Debug, Clone)]
pub struct Harvester {
    fetcher: PageFetcher,
    endpoint: Url,
    queue_capacity: usize,
}

impl Harvester {
    pub fn new(fetcher: PageFetcher, endpoint: Url) -> Self {
        Self {
            fetcher,
            endpoint,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Harvest from `checkpoint` until a stop condition is met.
    ///
    /// Any processor error is fatal and stops the fetch task. A fetch error is
    /// reported after the pages already queued have been processed.
    #[instrument(skip_all, fields(from = checkpoint.pages.from, total = checkpoint.total))]
    pub async fn run(
        &self,
        checkpoint: Checkpoint,
        processor: &mut dyn ItemProcessor,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<HarvestSummary> {
        let start = Instant::now();
        progress.phase("Harvesting");

        let (tx, mut rx) = mpsc::channel(self.queue_capacity);
        let fetch_cancel = cancel.child_token();
        let fetch_task = tokio::spawn(fetch_pages(
            self.fetcher.clone(),
            self.endpoint.clone(),
            checkpoint,
            tx,
            fetch_cancel.clone(),
        ));
        // Stops the fetch task on every early return below.
        let _stop_fetching = fetch_cancel.drop_guard();

        let mut summary = HarvestSummary::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProtocolsError::Cancelled),
                next = rx.recv() => next,
            };
            let Some(page) = next else { break };

            let (current, total_pages) = (page.checkpoint.current_page, page.checkpoint.total_pages);
            let items = page.items.len();
            processor.process(page, cancel).await?;

            summary.pages += 1;
            summary.items += items;
            progress.page_processed(current, total_pages, items);
        }

        fetch_task
            .await
            .map_err(|e| ProtocolsError::Task(format!("fetch task: {e}")))??;

        summary.elapsed = start.elapsed();
        info!(
            pages = summary.pages,
            items = summary.items,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "harvest complete"
        );
        progress.done();
        Ok(summary)
    }
}

/// The fetch task: request pages and queue them until a stop condition.
async fn fetch_pages(
    fetcher: PageFetcher,
    endpoint: Url,
    mut checkpoint: Checkpoint,
    tx: mpsc::Sender<HarvestedPage>,
    cancel: CancellationToken,
) -> Result<()> {
    let cap = checkpoint.total_cap();
    let upper = if cap.is_none() {
        checkpoint.pages.upper_bound()
    } else {
        None
    };

    loop {
        if cancel.is_cancelled() {
            return Err(ProtocolsError::Cancelled);
        }
        if checkpoint.is_complete() {
            debug!(
                page = checkpoint.pages.from,
                delivered = checkpoint.items_delivered,
                "nothing left to fetch"
            );
            return Ok(());
        }

        let requested = checkpoint.pages.from;
        let page = fetcher
            .fetch_page(&checkpoint.request(&endpoint), &cancel)
            .await?;
        let advance = checkpoint.update(&page.pagination)?;

        let mut items = page.items;
        let mut cap_reached = false;
        if let Some(total) = cap {
            let remaining = total.saturating_sub(checkpoint.items_delivered);
            if items.len() as u64 >= remaining {
                // remaining <= items.len() here, so the cast cannot truncate.
                items.truncate(remaining as usize);
                cap_reached = true;
            }
        }
        checkpoint.items_delivered += items.len() as u64;

        debug!(
            requested,
            page = checkpoint.current_page,
            total_pages = checkpoint.total_pages,
            items = items.len(),
            "fetched page"
        );

        let harvested = HarvestedPage {
            items,
            extras: page.extras,
            checkpoint: checkpoint.clone(),
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProtocolsError::Cancelled),
            sent = tx.send(harvested) => {
                if sent.is_err() {
                    warn!("processor stopped; ending fetch");
                    return Ok(());
                }
            }
        }

        if cap_reached {
            info!(total = checkpoint.total, "item cap reached");
            return Ok(());
        }
        if advance == Advance::Done {
            info!(total_pages = checkpoint.total_pages, "last page reached");
            return Ok(());
        }
        if upper.is_some_and(|upper| requested >= upper) {
            info!(page = requested, "end of requested page range");
            return Ok(());
        }
    }
}
