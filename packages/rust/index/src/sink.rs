//! Bulk index sink trait and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use protocolsio_shared::{IndexConfig, ProtocolsError, Result};

use crate::document::{BulkIndexRequest, DocumentCountRequest, DocumentCountResponse};

const BULK_INDEX_PATH: &str = "bulkindexdocuments";
const DOCUMENT_COUNT_PATH: &str = "getdocumentcount";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Abstract interface to a search index that accepts bulk uploads.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Upload one batch of an upload session.
    async fn bulk_index(&self, request: &BulkIndexRequest) -> Result<()>;

    /// Number of documents the index holds for `datasource`.
    async fn document_count(&self, datasource: &str) -> Result<u64>;
}

/// [`IndexSink`] speaking JSON over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpIndexSink {
    client: Client,
    endpoint: Url,
    token: Option<String>,
    token_env: String,
}

impl HttpIndexSink {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProtocolsError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            token_env: config.token_env.clone(),
        })
    }

    fn url(&self, method: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ProtocolsError::config(format!("index endpoint {} cannot take a path", self.endpoint))
            })?
            .pop_if_empty()
            .push(method);
        Ok(url)
    }

    async fn post<B: Serialize + Sync>(&self, method: &str, body: &B) -> Result<Vec<u8>> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ProtocolsError::Unauthenticated {
                env_var: self.token_env.clone(),
            })?;
        let url = self.url(method)?;
        debug!(%url, "POST");

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ProtocolsError::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProtocolsError::Transport(format!("{url}: reading body: {e}")))?;
        if !status.is_success() {
            return Err(ProtocolsError::Sink(format!(
                "{url}: HTTP {status}: {}",
                String::from_utf8_lossy(&bytes).trim()
            )));
        }
        Ok(bytes.to_vec())
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T> {
        let bytes = self.post(method, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProtocolsError::decode(format!("{method} response: {e}")))
    }
}

#[async_trait]
impl IndexSink for HttpIndexSink {
    #[instrument(skip_all, fields(
        upload_id = %request.upload_id,
        documents = request.documents.len(),
        first = request.is_first_page,
        last = request.is_last_page,
    ))]
    async fn bulk_index(&self, request: &BulkIndexRequest) -> Result<()> {
        self.post(BULK_INDEX_PATH, request).await.map(|_| ())
    }

    async fn document_count(&self, datasource: &str) -> Result<u64> {
        let response: DocumentCountResponse = self
            .post_json(DOCUMENT_COUNT_PATH, &DocumentCountRequest { datasource })
            .await?;
        Ok(response.document_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, token: Option<&str>) -> IndexConfig {
        IndexConfig {
            endpoint: Url::parse(&format!("{}/api/index/v1", server.uri())).unwrap(),
            token: token.map(str::to_string),
            token_env: "PROTOCOLSIO_INDEX_TOKEN".into(),
            datasource: "protocolsio".into(),
            batch_size: 50,
            queue_capacity: 100,
        }
    }

    fn request() -> BulkIndexRequest {
        BulkIndexRequest {
            datasource: "protocolsio".into(),
            upload_id: "upload-1".into(),
            is_first_page: true,
            is_last_page: true,
            force_restart_upload: Some(true),
            documents: Vec::new(),
        }
    }

    #[tokio::test]
    async fn bulk_index_posts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/index/v1/bulkindexdocuments"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "uploadId": "upload-1",
                "isFirstPage": true,
                "forceRestartUpload": true
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpIndexSink::new(&config(&server, Some("secret"))).unwrap();
        sink.bulk_index(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn rejection_carries_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("upload id reused"))
            .mount(&server)
            .await;

        let sink = HttpIndexSink::new(&config(&server, Some("secret"))).unwrap();
        let err = sink.bulk_index(&request()).await.unwrap_err();
        match err {
            ProtocolsError::Sink(msg) => {
                assert!(msg.contains("400"));
                assert!(msg.contains("upload id reused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn document_count_reads_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/index/v1/getdocumentcount"))
            .and(body_partial_json(serde_json::json!({"datasource": "protocolsio"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"documentCount": 1234})),
            )
            .mount(&server)
            .await;

        let sink = HttpIndexSink::new(&config(&server, Some("secret"))).unwrap();
        assert_eq!(sink.document_count("protocolsio").await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn missing_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sink = HttpIndexSink::new(&config(&server, None)).unwrap();
        let err = sink.document_count("protocolsio").await.unwrap_err();
        assert!(matches!(err, ProtocolsError::Unauthenticated { .. }));
    }
}
