//! Wire types of the bulk index API.

use serde::{Deserialize, Serialize};

use protocolsio_shared::Protocol;

/// Domain appended to creator usernames to form author emails.
const AUTHOR_EMAIL_DOMAIN: &str = "protocols.io";

/// One `bulkindexdocuments` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkIndexRequest {
    pub datasource: String,
    pub upload_id: String,
    pub is_first_page: bool,
    pub is_last_page: bool,
    /// Only ever set on the first batch of an upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_restart_upload: Option<bool>,
    pub documents: Vec<Document>,
}

/// A protocol as the index sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub datasource: String,
    pub id: String,
    #[serde(rename = "viewURL")]
    pub view_url: String,
    pub title: String,
    pub summary: Content,
    pub author: Author,
    pub permissions: Permissions,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub mime_type: String,
    pub text_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    pub email: String,
    pub datasource_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub allow_anonymous_access: bool,
}

impl Document {
    pub fn from_protocol(protocol: &Protocol, datasource: &str) -> Self {
        Self {
            datasource: datasource.to_string(),
            id: protocol.uri.clone(),
            view_url: protocol.url.clone(),
            title: protocol.title.clone(),
            summary: Content {
                mime_type: "text/plain".into(),
                text_content: summary_text(&protocol.description),
            },
            author: Author {
                name: protocol.creator.name.clone(),
                email: format!("{}@{AUTHOR_EMAIL_DOMAIN}", protocol.creator.username),
                datasource_user_id: protocol.creator.username.clone(),
            },
            permissions: Permissions {
                allow_anonymous_access: true,
            },
            created_at: protocol.created_on,
        }
    }
}

#[derive(Deserialize)]
struct RichText {
    #[serde(default, alias = "Blocks")]
    blocks: Vec<RichTextBlock>,
}

#[derive(Deserialize)]
struct RichTextBlock {
    #[serde(default, alias = "Text")]
    text: String,
}

/// First block of a rich-text description, or the description as is.
pub fn summary_text(description: &str) -> String {
    match serde_json::from_str::<RichText>(description) {
        Ok(rich) if !rich.blocks.is_empty() => rich
            .blocks
            .into_iter()
            .next()
            .map(|b| b.text)
            .unwrap_or_default(),
        _ => description.to_string(),
    }
}

/// Body of a `getdocumentcount` call.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DocumentCountRequest<'a> {
    pub datasource: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DocumentCountResponse {
    #[serde(default)]
    pub document_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocolsio_shared::Creator;

    #[test]
    fn summary_uses_first_rich_text_block() {
        let rich = r#"{"blocks":[{"key":"a","text":"First."},{"key":"b","text":"Second."}]}"#;
        assert_eq!(summary_text(rich), "First.");
    }

    #[test]
    fn summary_falls_back_to_raw_description() {
        assert_eq!(summary_text("Plain words"), "Plain words");
        assert_eq!(summary_text(r#"{"blocks":[]}"#), r#"{"blocks":[]}"#);
        assert_eq!(summary_text(""), "");
    }

    #[test]
    fn document_maps_protocol_fields() {
        let protocol = Protocol {
            id: 9,
            uri: "pcr-setup".into(),
            url: "https://www.protocols.io/view/pcr-setup".into(),
            title: "PCR setup".into(),
            description: r#"{"blocks":[{"text":"Mix reagents."}]}"#.into(),
            version_id: 2,
            created_on: 1_650_000_000,
            creator: Creator {
                name: "Ada".into(),
                username: "ada".into(),
            },
        };
        let doc = Document::from_protocol(&protocol, "protocolsio");
        assert_eq!(doc.id, "pcr-setup");
        assert_eq!(doc.summary.text_content, "Mix reagents.");
        assert_eq!(doc.author.email, "ada@protocols.io");
        assert!(doc.permissions.allow_anonymous_access);

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["viewURL"], "https://www.protocols.io/view/pcr-setup");
        assert_eq!(json["createdAt"], 1_650_000_000);
        assert_eq!(json["author"]["datasourceUserId"], "ada");
    }

    #[test]
    fn force_restart_is_omitted_unless_set() {
        let request = BulkIndexRequest {
            datasource: "protocolsio".into(),
            upload_id: "u1".into(),
            is_first_page: false,
            is_last_page: true,
            force_restart_upload: None,
            documents: Vec::new(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("forceRestartUpload").is_none());
        assert_eq!(json["isLastPage"], true);
        assert_eq!(json["uploadId"], "u1");
    }
}
