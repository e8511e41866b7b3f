//! Harvest orchestration for protocolsio.
//!
//! This crate ties the API client and the artifact store together into the
//! resumable harvest pipeline:
//! - [`Checkpoint`]: query options plus the cursor of the next page
//! - [`Harvester`]: the fetch task and the bounded page queue
//! - [`ItemProcessor`]: what happens to each page ([`Printer`] or [`Saver`])

pub mod checkpoint;
pub mod harvest;
pub mod processor;

#[cfg(test)]
mod testutil;

pub use checkpoint::{Advance, Checkpoint, FILTERS, HarvestOptions, ORDER_DIRECTIONS, ORDER_FIELDS};
pub use harvest::{DEFAULT_QUEUE_CAPACITY, HarvestSummary, Harvester};
pub use processor::{HarvestedPage, ItemProcessor, Printer, Saver, summary_line};
