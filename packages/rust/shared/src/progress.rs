//! Progress callbacks shared by the harvest and index pipelines.

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after a harvested page has been fully processed.
    fn page_processed(&self, current_page: u64, total_pages: u64, items: usize);
    /// Called after a batch has been accepted by the index sink.
    fn batch_indexed(&self, batch_docs: usize, total_docs: usize);
    /// Called when the pipeline completes.
    fn done(&self);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_processed(&self, _current_page: u64, _total_pages: u64, _items: usize) {}
    fn batch_indexed(&self, _batch_docs: usize, _total_docs: usize) {}
    fn done(&self) {}
}
