//! Harvest checkpoints.
//!
//! A [`Checkpoint`] captures everything needed to resume a harvest: the
//! query parameters, the cursor of the next page to request and the last
//! pagination block seen. One is persisted after every fully processed page
//! as `checkpoint_<current:05>_<total:05>.json`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use protocolsio_client::PageRequest;
use protocolsio_shared::{PageRange, Pagination, ProtocolsError, Result};

/// Accepted values for the list `filter` parameter.
pub const FILTERS: &[&str] = &["public", "user_public", "user_private", "shared_with_user"];

/// Accepted values for the list `order_field` parameter.
pub const ORDER_FIELDS: &[&str] = &["activity", "relevance", "date", "name", "id"];

/// Accepted values for the list `order_dir` parameter.
pub const ORDER_DIRECTIONS: &[&str] = &["asc", "desc"];

/// Query options for a fresh harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOptions {
    pub pages: PageRange,
    pub page_size: u64,
    /// Stop after this many items; `0` means no cap.
    pub total: u64,
    pub filter: String,
    pub field_order: String,
    pub order: String,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            pages: PageRange::default(),
            page_size: 20,
            total: 0,
            filter: "public".into(),
            field_order: "activity".into(),
            order: "asc".into(),
        }
    }
}

/// What the harvester should do after a page has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The server reported the final page.
    Done,
    /// Request this page id next.
    Next(u64),
}

/// Resumable harvest state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub current_page: u64,
    pub total_pages: u64,
    /// `pages.from` is the cursor of the next page to request.
    pub pages: PageRange,
    pub page_size: u64,
    pub filter: String,
    pub field_order: String,
    pub order: String,
    /// Item cap for the whole run; `0` means none.
    #[serde(default)]
    pub total: u64,
    /// Items handed to the processor so far, across resumes.
    #[serde(default)]
    pub items_delivered: u64,
    /// Set once the server has reported the final page.
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub pagination: Pagination,
    /// Artifacts written for the page this checkpoint was recorded after.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Validate `options` and build the initial checkpoint of a new run.
    ///
    /// Every invalid option is reported, not just the first.
    pub fn from_options(options: &HarvestOptions) -> Result<Self> {
        let mut problems = Vec::new();
        if !FILTERS.contains(&options.filter.as_str()) {
            problems.push(format!(
                "filter {:?} is not one of {}",
                options.filter,
                FILTERS.join(", ")
            ));
        }
        if !ORDER_FIELDS.contains(&options.field_order.as_str()) {
            problems.push(format!(
                "order field {:?} is not one of {}",
                options.field_order,
                ORDER_FIELDS.join(", ")
            ));
        }
        if !ORDER_DIRECTIONS.contains(&options.order.as_str()) {
            problems.push(format!(
                "order {:?} is not one of {}",
                options.order,
                ORDER_DIRECTIONS.join(", ")
            ));
        }
        if options.page_size == 0 {
            problems.push("page size must be at least 1".to_string());
        }
        if !problems.is_empty() {
            return Err(ProtocolsError::validation(problems.join("; ")));
        }

        Ok(Self {
            current_page: 0,
            total_pages: 0,
            pages: options.pages,
            page_size: options.page_size,
            filter: options.filter.clone(),
            field_order: options.field_order.clone(),
            order: options.order.clone(),
            total: options.total,
            items_delivered: 0,
            done: false,
            pagination: Pagination::default(),
            files: Vec::new(),
            written_at: None,
        })
    }

    /// Load a checkpoint previously written by a harvest.
    pub fn load(path: &Path) -> Result<Self> {
        let buf = std::fs::read(path).map_err(|e| ProtocolsError::io(path, e))?;
        serde_json::from_slice(&buf)
            .map_err(|e| ProtocolsError::decode(format!("{}: {e}", path.display())))
    }

    /// The item cap, if one was requested.
    pub fn total_cap(&self) -> Option<u64> {
        (self.total > 0).then_some(self.total)
    }

    /// True when resuming from this checkpoint would fetch nothing.
    pub fn is_complete(&self) -> bool {
        if self.done {
            return true;
        }
        match self.total_cap() {
            Some(total) => self.items_delivered >= total,
            None => self
                .pages
                .upper_bound()
                .is_some_and(|upper| self.pages.from > upper),
        }
    }

    /// The list request for the next page.
    pub fn request(&self, endpoint: &Url) -> PageRequest {
        PageRequest {
            endpoint: endpoint.clone(),
            page_id: self.pages.from,
            page_size: self.page_size,
            filter: self.filter.clone(),
            field_order: self.field_order.clone(),
            order: self.order.clone(),
        }
    }

    /// Record a freshly fetched pagination block and work out what comes next.
    ///
    /// A non-final page must carry a parseable `next_page` cursor.
    pub fn update(&mut self, pagination: &Pagination) -> Result<Advance> {
        self.current_page = pagination.current_page;
        self.total_pages = pagination.total_pages;
        self.pagination = pagination.clone();
        if pagination.is_done() {
            self.done = true;
            return Ok(Advance::Done);
        }
        let next = pagination.next_page_id()?;
        self.pages.from = next;
        Ok(Advance::Next(next))
    }

    /// `checkpoint_<current:05>_<total:05>.json`
    pub fn filename(&self) -> String {
        format!(
            "checkpoint_{:05}_{:05}.json",
            self.current_page, self.total_pages
        )
    }

    pub fn reset_files(&mut self) {
        self.files.clear();
    }

    pub fn push_file(&mut self, name: impl Into<String>) {
        self.files.push(name.into());
    }
}
