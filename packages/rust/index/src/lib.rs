//! Bulk indexing of downloaded protocols.
//!
//! - [`DirectoryStream`]: lazily batches the `.detail` records of a cache dir
//! - [`BulkIndexer`]: turns batches into one tagged upload and tracks [`IndexStats`]
//! - [`IndexSink`]: the upload target, with [`HttpIndexSink`] as the real one

pub mod document;
pub mod pipeline;
pub mod sink;
pub mod stream;

pub use document::{Author, BulkIndexRequest, Content, Document, Permissions, summary_text};
pub use pipeline::{BulkIndexer, DEFAULT_QUEUE_CAPACITY, IndexStats, UploadOptions};
pub use sink::{HttpIndexSink, IndexSink};
pub use stream::{DEFAULT_BATCH_SIZE, DirectoryStream, RecordBatch};
