//! HTTP access to the protocols.io API.
//!
//! This crate provides:
//! - [`PageFetcher`]: authenticated GETs with typed JSON decoding
//! - [`Backoff`]: the exponential backoff applied to HTTP 429 responses
//! - [`PageRequest`]: list-endpoint query construction

pub mod backoff;
pub mod fetcher;

pub use backoff::Backoff;
pub use fetcher::{Fetched, PageFetcher, PageRequest};
