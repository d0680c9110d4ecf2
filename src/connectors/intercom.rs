//! Intercom API client
//!
//! Help centers are the sync scope, collections nest up to three levels below
//! them and articles hang off collections. Intercom paginates with page
//! numbers; the cursor is the next page number as a string.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::http::ProviderHttp;
use super::trait_::{
    ClientError, ConnectionRef, Page, ProviderClient, RemoteResource, ResourceRef, unsupported,
};
use crate::provider::{NodeKind, ProviderKind};

const PER_PAGE: &str = "50";

#[derive(Debug, Deserialize)]
struct Pages {
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct HelpCenter {
    id: serde_json::Value,
    display_name: Option<String>,
    url: Option<String>,
    created_at: Option<i64>,
    updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Collection {
    id: String,
    name: String,
    description: Option<String>,
    url: Option<String>,
    help_center_id: Option<serde_json::Value>,
    parent_id: Option<String>,
    created_at: Option<i64>,
    updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    data: Vec<Collection>,
    pages: Option<Pages>,
}

#[derive(Debug, Deserialize)]
struct Article {
    id: String,
    title: String,
    description: Option<String>,
    body: Option<String>,
    state: String,
    url: Option<String>,
    parent_id: Option<serde_json::Value>,
    parent_type: Option<String>,
    created_at: Option<i64>,
    updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ArticleList {
    data: Vec<Article>,
    pages: Option<Pages>,
}

fn from_unix(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Intercom returns some ids as numbers and some as strings.
fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn next_page(pages: Option<Pages>) -> Option<String> {
    pages
        .filter(|p| p.page < p.total_pages)
        .map(|p| (p.page + 1).to_string())
}

fn collection_resource(collection: Collection) -> RemoteResource {
    RemoteResource {
        kind: Some(NodeKind::IntercomCollection),
        external_id: collection.id,
        parent_external_id: collection.parent_id,
        title: Some(collection.name),
        description: collection.description,
        url: collection.url,
        created_at: from_unix(collection.created_at),
        updated_at: from_unix(collection.updated_at),
        ..Default::default()
    }
}

fn article_resource(article: Article) -> RemoteResource {
    let parent = match article.parent_type.as_deref() {
        Some("collection") | None => article.parent_id.as_ref().and_then(id_string),
        Some(_) => None,
    };
    RemoteResource {
        kind: Some(NodeKind::IntercomArticle),
        external_id: article.id,
        parent_external_id: parent,
        title: Some(article.title),
        description: article.description,
        url: article.url,
        body: article.body,
        state: Some(article.state),
        created_at: from_unix(article.created_at),
        updated_at: from_unix(article.updated_at),
        tags: Vec::new(),
    }
}

pub struct IntercomClient {
    http: ProviderHttp,
    api_base: String,
}

impl IntercomClient {
    pub fn new(http: ProviderHttp, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str, page: Option<&str>) -> Result<Url, ClientError> {
        let mut url = self.http.url(&format!("{}{}", self.api_base, path))?;
        if let Some(page) = page {
            url.query_pairs_mut()
                .append_pair("page", page)
                .append_pair("per_page", PER_PAGE);
        }
        Ok(url)
    }
}

#[async_trait]
impl ProviderClient for IntercomClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Intercom
    }

    async fn list_page(
        &self,
        conn: &ConnectionRef,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
    ) -> Result<Page, ClientError> {
        let page = cursor.unwrap_or("1");
        match (parent.kind, child_kind) {
            (
                NodeKind::IntercomHelpCenter | NodeKind::IntercomCollection,
                NodeKind::IntercomCollection,
            ) => {
                let url = self.url("/help_center/collections", Some(page))?;
                let Some(list) = self.http.get_json::<CollectionList>(conn, url).await? else {
                    return Ok(Page::default());
                };
                // Root collections have no parent; nested ones point at theirs.
                let wanted_parent = (parent.kind == NodeKind::IntercomCollection)
                    .then_some(parent.external_id.as_str());
                let list = list.body;
                let next_cursor = next_page(list.pages);
                let items = list
                    .data
                    .into_iter()
                    .filter(|c| {
                        c.help_center_id
                            .as_ref()
                            .and_then(id_string)
                            .is_none_or(|hc| hc == parent.scope_external_id)
                    })
                    .filter(|c| c.parent_id.as_deref() == wanted_parent)
                    .map(collection_resource)
                    .collect();
                Ok(Page { items, next_cursor })
            }
            (NodeKind::IntercomCollection, NodeKind::IntercomArticle) => {
                let url = self.url("/articles", Some(page))?;
                let Some(list) = self.http.get_json::<ArticleList>(conn, url).await? else {
                    return Ok(Page::default());
                };
                let list = list.body;
                let next_cursor = next_page(list.pages);
                let items = list
                    .data
                    .into_iter()
                    .map(article_resource)
                    .filter(|a| {
                        a.parent_external_id.as_deref() == Some(parent.external_id.as_str())
                    })
                    .collect();
                Ok(Page { items, next_cursor })
            }
            (_, child) => Err(unsupported(ProviderKind::Intercom, child)),
        }
    }

    async fn get_one(
        &self,
        conn: &ConnectionRef,
        node: &ResourceRef,
    ) -> Result<Option<RemoteResource>, ClientError> {
        match node.kind {
            NodeKind::IntercomHelpCenter => {
                let url = self.url(
                    &format!("/help_center/help_centers/{}", node.external_id),
                    None,
                )?;
                Ok(self
                    .http
                    .get_json::<HelpCenter>(conn, url)
                    .await?
                    .map(|f| RemoteResource {
                        kind: Some(NodeKind::IntercomHelpCenter),
                        external_id: id_string(&f.body.id)
                            .unwrap_or_else(|| node.external_id.clone()),
                        title: f.body.display_name,
                        url: f.body.url,
                        created_at: from_unix(f.body.created_at),
                        updated_at: from_unix(f.body.updated_at),
                        ..Default::default()
                    }))
            }
            NodeKind::IntercomCollection => {
                let url =
                    self.url(&format!("/help_center/collections/{}", node.external_id), None)?;
                Ok(self
                    .http
                    .get_json::<Collection>(conn, url)
                    .await?
                    .map(|f| collection_resource(f.body)))
            }
            NodeKind::IntercomArticle => {
                let url = self.url(&format!("/articles/{}", node.external_id), None)?;
                Ok(self
                    .http
                    .get_json::<Article>(conn, url)
                    .await?
                    .map(|f| article_resource(f.body)))
            }
            kind => Err(unsupported(ProviderKind::Intercom, kind)),
        }
    }
}
