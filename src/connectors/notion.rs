//! Notion API client
//!
//! Workspaces are the sync scope, databases the containers and database rows
//! (pages) the leaves. Archived objects are reported as not found.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;

use super::http::ProviderHttp;
use super::trait_::{
    ClientError, ConnectionRef, Page, ProviderClient, RemoteResource, ResourceRef, unsupported,
};
use crate::provider::{NodeKind, ProviderKind};

pub const NOTION_VERSION: &str = "2022-06-28";

/// Headers every Notion request must carry.
pub fn notion_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Notion-Version", HeaderValue::from_static(NOTION_VERSION));
    headers
}

#[derive(Debug, Deserialize)]
struct RichText {
    plain_text: String,
}

#[derive(Debug, Deserialize)]
struct Bot {
    workspace_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    bot: Option<Bot>,
}

#[derive(Debug, Deserialize)]
struct Database {
    id: String,
    #[serde(default)]
    title: Vec<RichText>,
    #[serde(default)]
    description: Vec<RichText>,
    url: Option<String>,
    #[serde(default)]
    archived: bool,
    created_time: Option<DateTime<Utc>>,
    last_edited_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NotionPage {
    id: String,
    url: Option<String>,
    #[serde(default)]
    archived: bool,
    created_time: Option<DateTime<Utc>>,
    last_edited_time: Option<DateTime<Utc>>,
    parent: Option<serde_json::Value>,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Results<T> {
    results: Vec<T>,
    next_cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

fn plain(texts: &[RichText]) -> String {
    texts.iter().map(|t| t.plain_text.as_str()).collect()
}

/// Text of the page's `title` property.
fn page_title(properties: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    properties.values().find_map(|prop| {
        if prop.get("type")?.as_str()? != "title" {
            return None;
        }
        let texts = prop.get("title")?.as_array()?;
        let title: String = texts
            .iter()
            .filter_map(|t| t.get("plain_text")?.as_str())
            .collect();
        Some(title)
    })
}

/// Flattens the rich text of a block list into paragraphs.
fn render_blocks(blocks: &[serde_json::Value]) -> String {
    blocks
        .iter()
        .filter_map(|block| {
            let kind = block.get("type")?.as_str()?;
            let texts = block.get(kind)?.get("rich_text")?.as_array()?;
            let text: String = texts
                .iter()
                .filter_map(|t| t.get("plain_text")?.as_str())
                .collect();
            (!text.trim().is_empty()).then_some(text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn database_resource(db: Database) -> Option<RemoteResource> {
    if db.archived {
        return None;
    }
    let description = plain(&db.description);
    Some(RemoteResource {
        kind: Some(NodeKind::NotionDatabase),
        title: Some(plain(&db.title)),
        description: (!description.is_empty()).then_some(description),
        external_id: db.id,
        url: db.url,
        created_at: db.created_time,
        updated_at: db.last_edited_time,
        ..Default::default()
    })
}

fn page_resource(page: NotionPage) -> Option<RemoteResource> {
    if page.archived {
        return None;
    }
    let parent = page
        .parent
        .as_ref()
        .and_then(|p| p.get("database_id"))
        .and_then(|id| id.as_str())
        .map(str::to_string);
    Some(RemoteResource {
        kind: Some(NodeKind::NotionPage),
        title: page_title(&page.properties),
        external_id: page.id,
        parent_external_id: parent,
        url: page.url,
        created_at: page.created_time,
        updated_at: page.last_edited_time,
        ..Default::default()
    })
}

pub struct NotionClient {
    http: ProviderHttp,
    api_base: String,
}

impl NotionClient {
    pub fn new(http: ProviderHttp, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> Result<url::Url, ClientError> {
        self.http.url(&format!("{}{}", self.api_base, path))
    }

    fn paging_body(cursor: Option<&str>) -> serde_json::Value {
        let mut body = json!({ "page_size": 100 });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }
        body
    }

    async fn page_body(&self, conn: &ConnectionRef, page_id: &str) -> Result<String, ClientError> {
        let mut url = self.url(&format!("/blocks/{page_id}/children"))?;
        url.query_pairs_mut().append_pair("page_size", "100");
        Ok(self
            .http
            .get_json::<Results<serde_json::Value>>(conn, url)
            .await?
            .map(|f| render_blocks(&f.body.results))
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProviderClient for NotionClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Notion
    }

    async fn list_page(
        &self,
        conn: &ConnectionRef,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
    ) -> Result<Page, ClientError> {
        match (parent.kind, child_kind) {
            (NodeKind::NotionWorkspace, NodeKind::NotionDatabase) => {
                let mut body = Self::paging_body(cursor);
                body["filter"] = json!({ "property": "object", "value": "database" });
                let Some(found) = self
                    .http
                    .post_json::<Results<Database>>(conn, self.url("/search")?, body)
                    .await?
                else {
                    return Ok(Page::default());
                };
                let found = found.body;
                Ok(Page {
                    items: found.results.into_iter().filter_map(database_resource).collect(),
                    next_cursor: found.next_cursor.filter(|_| found.has_more),
                })
            }
            (NodeKind::NotionDatabase, NodeKind::NotionPage) => {
                let url = self.url(&format!("/databases/{}/query", parent.external_id))?;
                let Some(rows) = self
                    .http
                    .post_json::<Results<NotionPage>>(conn, url, Self::paging_body(cursor))
                    .await?
                else {
                    return Ok(Page::default());
                };
                let rows = rows.body;
                let items = rows
                    .results
                    .into_iter()
                    .filter_map(page_resource)
                    .map(|mut page| {
                        page.parent_external_id = Some(parent.external_id.clone());
                        page
                    })
                    .collect();
                Ok(Page {
                    items,
                    next_cursor: rows.next_cursor.filter(|_| rows.has_more),
                })
            }
            (_, child) => Err(unsupported(ProviderKind::Notion, child)),
        }
    }

    async fn get_one(
        &self,
        conn: &ConnectionRef,
        node: &ResourceRef,
    ) -> Result<Option<RemoteResource>, ClientError> {
        match node.kind {
            // The integration token is scoped to one workspace; if it still
            // resolves the bot user, the workspace is still there.
            NodeKind::NotionWorkspace => Ok(self
                .http
                .get_json::<BotUser>(conn, self.url("/users/me")?)
                .await?
                .map(|f| RemoteResource {
                    kind: Some(NodeKind::NotionWorkspace),
                    external_id: node.external_id.clone(),
                    title: f.body.bot.and_then(|b| b.workspace_name),
                    ..Default::default()
                })),
            NodeKind::NotionDatabase => {
                let url = self.url(&format!("/databases/{}", node.external_id))?;
                Ok(self
                    .http
                    .get_json::<Database>(conn, url)
                    .await?
                    .and_then(|f| database_resource(f.body)))
            }
            NodeKind::NotionPage => {
                let url = self.url(&format!("/pages/{}", node.external_id))?;
                let Some(page) = self
                    .http
                    .get_json::<NotionPage>(conn, url)
                    .await?
                    .and_then(|f| page_resource(f.body))
                else {
                    return Ok(None);
                };
                let body = self.page_body(conn, &node.external_id).await?;
                Ok(Some(RemoteResource {
                    body: Some(body),
                    ..page
                }))
            }
            kind => Err(unsupported(ProviderKind::Notion, kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archived_pages_are_not_found() {
        let page: NotionPage = serde_json::from_value(json!({
            "id": "p1", "archived": true, "properties": {}
        }))
        .unwrap();
        assert!(page_resource(page).is_none());
    }

    #[test]
    fn page_title_comes_from_the_title_property() {
        let page: NotionPage = serde_json::from_value(json!({
            "id": "p2",
            "parent": {"type": "database_id", "database_id": "db-1"},
            "last_edited_time": "2024-06-01T12:00:00.000Z",
            "properties": {
                "Status": {"type": "select", "select": {"name": "Done"}},
                "Name": {
                    "type": "title",
                    "title": [{"plain_text": "Q3 "}, {"plain_text": "roadmap"}]
                }
            }
        }))
        .unwrap();
        let resource = page_resource(page).unwrap();
        assert_eq!(resource.title.as_deref(), Some("Q3 roadmap"));
        assert_eq!(resource.parent_external_id.as_deref(), Some("db-1"));
        assert!(resource.updated_at.is_some());
    }

    #[test]
    fn blocks_render_as_paragraphs() {
        let blocks = vec![
            json!({"type": "heading_1", "heading_1": {"rich_text": [{"plain_text": "Goals"}]}}),
            json!({"type": "divider", "divider": {}}),
            json!({"type": "paragraph", "paragraph": {"rich_text": [{"plain_text": "Ship it."}]}}),
        ];
        assert_eq!(render_blocks(&blocks), "Goals\n\nShip it.");
    }
}
