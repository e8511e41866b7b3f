//! Fixtures for the harvest tests.

use std::time::Duration;

use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use protocolsio_client::PageFetcher;
use protocolsio_shared::{ApiConfig, BackoffPolicy};

pub fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        token: Some("test-token".into()),
        token_env: "PROTOCOLSIO_TOKEN".into(),
        list_endpoint: Url::parse(&format!("{}/v3/protocols", server.uri())).unwrap(),
        get_endpoint: Url::parse(&format!("{}/v4/protocols", server.uri())).unwrap(),
        backoff: BackoffPolicy {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(40),
        },
    }
}

pub fn fetcher(server: &MockServer) -> PageFetcher {
    PageFetcher::new(&api_config(server)).unwrap()
}

pub fn item(id: u64, version: i64) -> Value {
    json!({
        "id": id,
        "uri": format!("protocol-{id}"),
        "title": format!("Protocol {id}"),
        "version_id": version,
    })
}

pub fn detail(id: u64, version: i64) -> Value {
    json!({
        "payload": {
            "id": id,
            "uri": format!("protocol-{id}"),
            "url": format!("https://www.protocols.io/view/protocol-{id}"),
            "title": format!("Protocol {id}"),
            "description": "",
            "version_id": version,
            "created_on": 1_600_000_000,
            "creator": {"name": "A. Author", "username": "author"}
        },
        "status_code": 0
    })
}

/// A list page whose items are `ids`; the last page carries no cursor.
pub fn list_page(page: u64, total_pages: u64, ids: impl IntoIterator<Item = u64>) -> Value {
    let next = if page < total_pages {
        json!(format!(
            "https://www.protocols.io/api/v3/protocols?page_size=20&page_id={}",
            page + 1
        ))
    } else {
        Value::Null
    };
    json!({
        "extras": {"page": page},
        "items": ids.into_iter().map(|id| item(id, 1)).collect::<Vec<_>>(),
        "pagination": {
            "current_page": page,
            "total_pages": total_pages,
            "next_page": next,
        }
    })
}

/// Mount `total_pages` pages of `per_page` items with ids counting from 1.
pub async fn mount_pages(server: &MockServer, total_pages: u64, per_page: u64) {
    for page in 1..=total_pages {
        let first = (page - 1) * per_page + 1;
        mount_page(server, page, list_page(page, total_pages, first..first + per_page)).await;
    }
}

pub async fn mount_page(server: &MockServer, page: u64, body: Value) {
    Mock::given(method("GET"))
        .and(path("/v3/protocols"))
        .and(query_param("page_id", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve an enriched record at `version` for any id.
pub async fn mount_details(server: &MockServer, version: i64) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/v4/protocols/\d+$"))
        .respond_with(move |req: &Request| {
            let id = req
                .url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(detail(id, version))
        })
        .mount(server)
        .await;
}
