//! Authenticated, rate-limit aware JSON fetching.
//!
//! Every request carries the configured bearer token. HTTP 429 responses are
//! retried with exponential backoff (see [`Backoff`]); every other failure is
//! surfaced to the caller immediately.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use protocolsio_shared::{
    ApiConfig, BackoffPolicy, ListPage, PAGE_ID_PARAM, Payload, ProtocolsError, Result,
};

use crate::backoff::Backoff;

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("protocolsio/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// One list-endpoint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub endpoint: Url,
    pub page_id: u64,
    pub page_size: u64,
    pub filter: String,
    pub field_order: String,
    pub order: String,
}

impl PageRequest {
    /// The full request URL with all query parameters.
    pub fn url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("page_size", &self.page_size.to_string())
            .append_pair("filter", &self.filter)
            .append_pair("field_order", &self.field_order)
            .append_pair("order", &self.order)
            .append_pair(PAGE_ID_PARAM, &self.page_id.to_string());
        url
    }
}

/// A decoded response together with the raw body it came from.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub body: Vec<u8>,
}

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// HTTP client for the protocols.io API.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    token: Option<String>,
    token_env: String,
    get_endpoint: Url,
    backoff: BackoffPolicy,
}

impl PageFetcher {
    /// Create a fetcher from resolved API settings.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProtocolsError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token: config.token.clone(),
            token_env: config.token_env.clone(),
            get_endpoint: config.get_endpoint.clone(),
            backoff: config.backoff,
        })
    }

    /// GET `url` and decode the JSON body as `T`.
    ///
    /// Retries HTTP 429 with exponential backoff until the policy's ceiling,
    /// then fails with [`ProtocolsError::RateLimited`].
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Fetched<T>> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ProtocolsError::Unauthenticated {
                env_var: self.token_env.clone(),
            })?;

        let mut backoff = Backoff::new(self.backoff);
        loop {
            if cancel.is_cancelled() {
                return Err(ProtocolsError::Cancelled);
            }
            debug!(%url, "GET");

            let request = self.client.get(url.clone()).bearer_auth(token).send();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(ProtocolsError::Cancelled),
                response = request => response
                    .map_err(|e| ProtocolsError::Transport(format!("{url}: {e}")))?,
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let Some(delay) = backoff.next_delay() else {
                    return Err(ProtocolsError::RateLimited {
                        url: url.to_string(),
                        waited: backoff.waited(),
                    });
                };
                warn!(%url, delay_ms = delay.as_millis() as u64, "too many requests, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ProtocolsError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            if backoff.retries() > 0 {
                info!(
                    %url,
                    retries = backoff.retries(),
                    waited_ms = backoff.waited().as_millis() as u64,
                    "succeeded after backing off"
                );
            }

            if !status.is_success() {
                return Err(ProtocolsError::Http {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let body = tokio::select! {
                _ = cancel.cancelled() => return Err(ProtocolsError::Cancelled),
                body = response.bytes() => body
                    .map_err(|e| ProtocolsError::Transport(format!("{url}: body read failed: {e}")))?,
            };
            let value = serde_json::from_slice(&body)
                .map_err(|e| ProtocolsError::decode(format!("{url}: {e}")))?;

            return Ok(Fetched {
                value,
                body: body.to_vec(),
            });
        }
    }

    /// Fetch one page of the list endpoint.
    #[instrument(skip_all, fields(page_id = request.page_id))]
    pub async fn fetch_page(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<ListPage> {
        let fetched = self.get_json::<ListPage>(&request.url(), cancel).await?;
        Ok(fetched.value)
    }

    /// Fetch the full record for one protocol.
    ///
    /// The returned body is the raw `{payload, status_code}` envelope; a
    /// non-zero `status_code` is an application error even on HTTP 200.
    #[instrument(skip_all, fields(id = id))]
    pub async fn fetch_item(
        &self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Fetched<serde_json::Value>> {
        let url = self.item_url(id)?;
        let fetched = self
            .get_json::<Payload<serde_json::Value>>(&url, cancel)
            .await?;
        if fetched.value.status_code != 0 {
            return Err(ProtocolsError::Application {
                url: url.to_string(),
                status_code: fetched.value.status_code,
            });
        }
        Ok(Fetched {
            value: fetched.value.payload,
            body: fetched.body,
        })
    }

    fn item_url(&self, id: u64) -> Result<Url> {
        let mut url = self.get_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ProtocolsError::config(format!("get endpoint {} cannot take a path", self.get_endpoint))
            })?
            .pop_if_empty()
            .push(&id.to_string());
        Ok(url)
    }
}
