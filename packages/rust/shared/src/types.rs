//! Core domain types for the protocols.io API and the on-disk artifacts.
//!
//! Item payloads are kept as opaque [`serde_json::Value`]s wherever they are
//! only passed through; the typed projections here carry just the fields the
//! harvester and indexer actually read.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProtocolsError, Result};

/// Query parameter that carries the page cursor in list requests.
pub const PAGE_ID_PARAM: &str = "page_id";

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Pagination block returned with every list page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub current_page: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default)]
    pub total_results: u64,
    /// Opaque URL whose `page_id` query parameter is the next cursor.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub next_page: String,
    #[serde(default)]
    pub page_size: u64,
    #[serde(default)]
    pub first: u64,
    #[serde(default)]
    pub last: u64,
}

impl Pagination {
    /// True once the server reports the final page.
    pub fn is_done(&self) -> bool {
        self.current_page == self.total_pages
    }

    /// Parse the next cursor out of [`Pagination::next_page`].
    pub fn next_page_id(&self) -> Result<u64> {
        let url = Url::parse(&self.next_page).map_err(|e| {
            ProtocolsError::decode(format!("invalid next_page url {:?}: {e}", self.next_page))
        })?;
        let raw = url
            .query_pairs()
            .find(|(k, _)| k == PAGE_ID_PARAM)
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| {
                ProtocolsError::decode(format!(
                    "no {PAGE_ID_PARAM} parameter in next_page {:?} (page {} of {})",
                    self.next_page, self.current_page, self.total_pages
                ))
            })?;
        raw.parse::<u64>().map_err(|e| {
            ProtocolsError::decode(format!("invalid {PAGE_ID_PARAM} {raw:?}: {e}"))
        })
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Wire envelopes
// ---------------------------------------------------------------------------

/// One page of the list endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPage {
    /// Page-level metadata copied next to every saved list item.
    #[serde(default, alias = "Extras")]
    pub extras: serde_json::Value,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// The `{payload, status_code}` wrapper used by the single-item endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload<T> {
    pub payload: T,
    #[serde(default)]
    pub status_code: i64,
}

// ---------------------------------------------------------------------------
// Protocol records
// ---------------------------------------------------------------------------

/// The projection of a list item the harvester needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedProtocol {
    pub id: u64,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version_id: i64,
}

/// Author of a protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
}

/// The enriched record stored in `<id>.detail` files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Either plain text or a serialized rich-text document.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default)]
    pub version_id: i64,
    /// Unix seconds.
    #[serde(default)]
    pub created_on: i64,
    #[serde(default)]
    pub creator: Creator,
}

// ---------------------------------------------------------------------------
// PageRange
// ---------------------------------------------------------------------------

/// A requested page range: `"3"`, `"3-7"` or `"3-"` (to the end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub from: u64,
    pub to: u64,
    pub extends_to_end: bool,
}

impl PageRange {
    /// The last page to request, unless the range runs to the end of results.
    pub fn upper_bound(&self) -> Option<u64> {
        (!self.extends_to_end).then_some(self.to)
    }
}

impl Default for PageRange {
    fn default() -> Self {
        Self {
            from: 1,
            to: 1,
            extends_to_end: false,
        }
    }
}

impl FromStr for PageRange {
    type Err = ProtocolsError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| {
            v.trim().parse::<u64>().map_err(|e| {
                ProtocolsError::validation(format!("invalid page range {s:?}: {e}"))
            })
        };
        let range = match s.split_once('-') {
            None => {
                let page = parse(s)?;
                Self {
                    from: page,
                    to: page,
                    extends_to_end: false,
                }
            }
            Some((from, to)) if to.trim().is_empty() => Self {
                from: parse(from)?,
                to: 0,
                extends_to_end: true,
            },
            Some((from, to)) => Self {
                from: parse(from)?,
                to: parse(to)?,
                extends_to_end: false,
            },
        };
        if range.from == 0 {
            return Err(ProtocolsError::validation("pages are numbered from 1"));
        }
        if !range.extends_to_end && range.to < range.from {
            return Err(ProtocolsError::validation(format!(
                "invalid page range {s:?}: end precedes start"
            )));
        }
        Ok(range)
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.extends_to_end, self.from == self.to) {
            (true, _) => write!(f, "{}-", self.from),
            (false, true) => write!(f, "{}", self.from),
            (false, false) => write!(f, "{}-{}", self.from, self.to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pagination(current: u64, total: u64, next: &str) -> Pagination {
        Pagination {
            current_page: current,
            total_pages: total,
            next_page: next.into(),
            ..Default::default()
        }
    }

    #[test]
    fn done_when_current_equals_total() {
        assert!(pagination(7, 7, "").is_done());
        assert!(!pagination(6, 7, "").is_done());
    }

    #[test]
    fn next_page_id_reads_cursor() {
        let p = pagination(
            1,
            9,
            "https://www.protocols.io/api/v3/protocols?filter=public&page_id=2&page_size=20",
        );
        assert_eq!(p.next_page_id().unwrap(), 2);
    }

    #[test]
    fn next_page_id_rejects_missing_or_bad_cursor() {
        let missing = pagination(1, 9, "https://www.protocols.io/api/v3/protocols?page_size=20");
        assert!(matches!(
            missing.next_page_id(),
            Err(ProtocolsError::Decode { .. })
        ));

        let garbage = pagination(1, 9, "https://www.protocols.io/api/v3/protocols?page_id=two");
        assert!(matches!(
            garbage.next_page_id(),
            Err(ProtocolsError::Decode { .. })
        ));

        let not_a_url = pagination(1, 9, "");
        assert!(not_a_url.next_page_id().is_err());
    }

    #[test]
    fn pagination_tolerates_null_next_page() {
        let json = r#"{"current_page":3,"total_pages":3,"total_results":41,"next_page":null,"page_size":20,"first":41,"last":41}"#;
        let p: Pagination = serde_json::from_str(json).unwrap();
        assert!(p.is_done());
        assert!(p.next_page.is_empty());
    }

    #[test]
    fn page_range_parsing() {
        let single: PageRange = "4".parse().unwrap();
        assert_eq!(single.upper_bound(), Some(4));
        assert_eq!(single.from, 4);

        let bounded: PageRange = "2-5".parse().unwrap();
        assert_eq!((bounded.from, bounded.upper_bound()), (2, Some(5)));

        let open: PageRange = "3-".parse().unwrap();
        assert!(open.extends_to_end);
        assert_eq!(open.upper_bound(), None);
        assert_eq!(open.to_string(), "3-");

        assert!("0".parse::<PageRange>().is_err());
        assert!("5-2".parse::<PageRange>().is_err());
        assert!("x".parse::<PageRange>().is_err());
    }

    #[test]
    fn detail_payload_decodes_protocol() {
        let json = r#"{"payload":{"id":1234,"uri":"p-1","title":"T","version_id":3,"creator":{"name":"A","username":"a"}},"status_code":0}"#;
        let p: Payload<Protocol> = serde_json::from_str(json).unwrap();
        assert_eq!(p.status_code, 0);
        assert_eq!(p.payload.version_id, 3);
        assert_eq!(p.payload.creator.username, "a");
        assert!(p.payload.description.is_empty());
    }
}
