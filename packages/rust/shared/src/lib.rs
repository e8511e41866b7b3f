//! Shared types, error model, and configuration for protocolsio.
//!
//! This crate is the foundation depended on by all other protocolsio crates.
//! It provides:
//! - [`ProtocolsError`]: the unified error type
//! - Domain types ([`Pagination`], [`ListPage`], [`Protocol`], [`PageRange`])
//! - Configuration ([`AppConfig`], [`ApiConfig`], [`IndexConfig`], config loading)
//! - [`ProgressReporter`]: progress callbacks used by both pipelines

pub mod config;
pub mod error;
pub mod progress;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, AppConfig, AuthConfig, BackoffPolicy, CacheConfig, EndpointsConfig, HarvestConfig,
    IndexConfig, IndexSection, RetryConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{ProtocolsError, Result};
pub use progress::{ProgressReporter, SilentProgress};
pub use types::{
    Creator, ListPage, ListedProtocol, PAGE_ID_PARAM, PageRange, Pagination, Payload, Protocol,
};
