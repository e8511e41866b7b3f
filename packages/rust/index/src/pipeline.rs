//! The bulk index pipeline: directory stream in, tagged upload batches out.

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use protocolsio_shared::{IndexConfig, ProgressReporter, ProtocolsError, Result};

use crate::document::{BulkIndexRequest, Document};
use crate::sink::IndexSink;
use crate::stream::DirectoryStream;

/// Batches buffered between the directory stream and the sink by default.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Running totals of an index run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub documents: usize,
    pub requests: usize,
    /// Time spent waiting on the sink.
    pub elapsed: Duration,
}

impl IndexStats {
    fn record(&mut self, documents: usize, took: Duration) {
        self.documents += documents;
        self.requests += 1;
        self.elapsed += took;
    }

    /// Mean sink latency per document.
    pub fn average_per_document(&self) -> Duration {
        match u32::try_from(self.documents) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.elapsed / n,
            Err(_) => Duration::from_secs_f64(self.elapsed.as_secs_f64() / self.documents as f64),
        }
    }

    /// Documents accepted per second of sink time.
    pub fn documents_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.documents as f64 / secs
        } else {
            0.0
        }
    }
}

/// Options of one bulk upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub datasource: String,
    pub upload_id: String,
    /// Ask the sink to discard any earlier upload with the same id.
    pub force_restart: bool,
    pub batch_size: usize,
    pub queue_capacity: usize,
}

impl UploadOptions {
    pub fn from_config(config: &IndexConfig, upload_id: impl Into<String>) -> Self {
        Self {
            datasource: config.datasource.clone(),
            upload_id: upload_id.into(),
            force_restart: false,
            batch_size: config.batch_size,
            queue_capacity: config.queue_capacity,
        }
    }
}

/// Streams a cache directory into an [`IndexSink`] as one upload.
pub struct BulkIndexer<S> {
    sink: S,
    options: UploadOptions,
}

impl<S: IndexSink> BulkIndexer<S> {
    pub fn new(sink: S, options: UploadOptions) -> Self {
        Self { sink, options }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Index every enriched record under `dir`.
    ///
    /// The first sink error aborts the run; batches already accepted stay.
    #[instrument(skip_all, fields(dir = %dir.display(), upload_id = %self.options.upload_id))]
    pub async fn run(
        &self,
        dir: &Path,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<IndexStats> {
        progress.phase("Indexing");

        let (tx, mut rx) = mpsc::channel(self.options.queue_capacity.max(1));
        let stream_cancel = cancel.child_token();
        let stream_task = tokio::spawn(
            DirectoryStream::new(dir, self.options.batch_size).stream(tx, stream_cancel.clone()),
        );
        let _stop_streaming = stream_cancel.drop_guard();

        let mut stats = IndexStats::default();
        let mut first = true;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProtocolsError::Cancelled),
                next = rx.recv() => next,
            };
            let Some(batch) = next else { break };
            let batch = batch?;

            let request = BulkIndexRequest {
                datasource: self.options.datasource.clone(),
                upload_id: self.options.upload_id.clone(),
                is_first_page: first,
                is_last_page: batch.last,
                force_restart_upload: first.then_some(self.options.force_restart),
                documents: batch
                    .records
                    .iter()
                    .map(|p| Document::from_protocol(p, &self.options.datasource))
                    .collect(),
            };
            first = false;

            let started = Instant::now();
            self.sink.bulk_index(&request).await?;
            let took = started.elapsed();
            stats.record(request.documents.len(), took);

            info!(
                batch_docs = request.documents.len(),
                total_docs = stats.documents,
                took_ms = took.as_millis() as u64,
                avg_us_per_doc = stats.average_per_document().as_micros() as u64,
                last = request.is_last_page,
                "batch indexed"
            );
            progress.batch_indexed(request.documents.len(), stats.documents);
        }

        stream_task
            .await
            .map_err(|e| ProtocolsError::Task(format!("directory stream: {e}")))?;

        info!(
            documents = stats.documents,
            requests = stats.requests,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            docs_per_sec = stats.documents_per_second(),
            "index run complete"
        );
        progress.done();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use protocolsio_shared::SilentProgress;
    use std::sync::Mutex;

    /// Records requests; fails the `fail_on`-th call (1-based) if set.
    #[derive(Default)]
    struct RecordingSink {
        requests: Mutex<Vec<BulkIndexRequest>>,
        fail_on: Option<usize>,
    }

    impl RecordingSink {
        fn tags(&self) -> Vec<(usize, bool, bool, Option<bool>)> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| {
                    (
                        r.documents.len(),
                        r.is_first_page,
                        r.is_last_page,
                        r.force_restart_upload,
                    )
                })
                .collect()
        }
    }

    #[async_trait]
    impl IndexSink for RecordingSink {
        async fn bulk_index(&self, request: &BulkIndexRequest) -> Result<()> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            if self.fail_on == Some(requests.len()) {
                return Err(ProtocolsError::Sink("rejected".into()));
            }
            Ok(())
        }

        async fn document_count(&self, _datasource: &str) -> Result<u64> {
            Ok(self.requests.lock().unwrap().iter().map(|r| r.documents.len() as u64).sum())
        }
    }

    fn options(force_restart: bool) -> UploadOptions {
        UploadOptions {
            datasource: "protocolsio".into(),
            upload_id: "upload-1".into(),
            force_restart,
            batch_size: 50,
            queue_capacity: 2,
        }
    }

    fn write_details(dir: &Path, count: u64) {
        for id in 1..=count {
            let body = serde_json::json!({
                "payload": {
                    "id": id,
                    "uri": format!("p-{id}"),
                    "url": format!("https://www.protocols.io/view/p-{id}"),
                    "title": format!("Protocol {id}"),
                    "description": "plain",
                    "version_id": 1,
                    "created_on": 1_600_000_000,
                    "creator": {"name": "A", "username": "a"}
                },
                "status_code": 0
            });
            std::fs::write(
                dir.join(format!("{id:06}.detail")),
                serde_json::to_vec(&body).unwrap(),
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn tags_first_and_last_batches() {
        let tmp = tempfile::tempdir().unwrap();
        write_details(tmp.path(), 120);

        let indexer = BulkIndexer::new(RecordingSink::default(), options(true));
        let stats = indexer
            .run(tmp.path(), &SilentProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            indexer.sink().tags(),
            vec![
                (50, true, false, Some(true)),
                (50, false, false, None),
                (20, false, true, None),
            ]
        );
        assert_eq!(stats.documents, 120);
        assert_eq!(stats.requests, 3);
        assert_eq!(indexer.sink().document_count("protocolsio").await.unwrap(), 120);
    }

    #[tokio::test]
    async fn single_batch_is_first_and_last() {
        let tmp = tempfile::tempdir().unwrap();
        write_details(tmp.path(), 3);

        let indexer = BulkIndexer::new(RecordingSink::default(), options(false));
        indexer
            .run(tmp.path(), &SilentProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(indexer.sink().tags(), vec![(3, true, true, Some(false))]);

        let requests = indexer.sink().requests.lock().unwrap();
        let doc = requests[0]
            .documents
            .iter()
            .find(|d| d.id == "p-2")
            .unwrap();
        assert_eq!(doc.summary.text_content, "plain");
        assert_eq!(doc.datasource, "protocolsio");
    }

    #[tokio::test]
    async fn sink_error_aborts_run() {
        let tmp = tempfile::tempdir().unwrap();
        write_details(tmp.path(), 150);

        let sink = RecordingSink {
            fail_on: Some(2),
            ..Default::default()
        };
        let indexer = BulkIndexer::new(sink, options(false));
        let err = indexer
            .run(tmp.path(), &SilentProgress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolsError::Sink(_)));
        assert_eq!(indexer.sink().tags().len(), 2);
    }

    #[tokio::test]
    async fn decode_error_aborts_run() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("000001.detail"), b"[]").unwrap();

        let indexer = BulkIndexer::new(RecordingSink::default(), options(false));
        let err = indexer
            .run(tmp.path(), &SilentProgress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolsError::Decode { .. }));
        assert!(indexer.sink().tags().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_stops() {
        let tmp = tempfile::tempdir().unwrap();
        write_details(tmp.path(), 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let indexer = BulkIndexer::new(RecordingSink::default(), options(false));
        let err = indexer
            .run(tmp.path(), &SilentProgress, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolsError::Cancelled));
    }

    #[test]
    fn stats_guard_against_empty_runs() {
        let stats = IndexStats::default();
        assert_eq!(stats.average_per_document(), Duration::ZERO);
        assert_eq!(stats.documents_per_second(), 0.0);

        let mut stats = IndexStats::default();
        stats.record(50, Duration::from_millis(500));
        stats.record(50, Duration::from_millis(500));
        assert_eq!(stats.average_per_document(), Duration::from_millis(10));
        assert!((stats.documents_per_second() - 100.0).abs() < 1e-9);
    }
}
