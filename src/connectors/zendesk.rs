//! Zendesk API client
//!
//! Brands are the sync scope. Help-center resources (categories, articles) are
//! served from the brand's own subdomain, which is looked up once per brand and
//! kept in the injected cache. Tickets are listed through the export search
//! endpoint, filtered to the brand.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::http::ProviderHttp;
use super::trait_::{
    ClientError, ConnectionRef, Page, ProviderClient, RemoteResource, ResourceRef, unsupported,
};
use crate::cache::TtlCache;
use crate::provider::{NodeKind, ProviderKind};

const PAGE_SIZE: &str = "100";
const SUBDOMAIN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct CursorMeta {
    #[serde(default)]
    has_more: bool,
    after_cursor: Option<String>,
}

impl CursorMeta {
    fn next(self) -> Option<String> {
        if self.has_more { self.after_cursor } else { None }
    }
}

#[derive(Debug, Deserialize)]
struct Brand {
    id: u64,
    name: String,
    subdomain: String,
    brand_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BrandResponse {
    brand: Brand,
}

#[derive(Debug, Deserialize)]
struct Category {
    id: u64,
    name: String,
    description: Option<String>,
    html_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CategoryResponse {
    category: Category,
}

#[derive(Debug, Deserialize)]
struct CategoriesPage {
    categories: Vec<Category>,
    meta: CursorMeta,
}

#[derive(Debug, Deserialize)]
struct Article {
    id: u64,
    title: String,
    body: Option<String>,
    html_url: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    label_names: Vec<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ArticleResponse {
    article: Article,
}

#[derive(Debug, Deserialize)]
struct ArticlesPage {
    articles: Vec<Article>,
    meta: CursorMeta,
}

#[derive(Debug, Deserialize)]
struct Ticket {
    id: u64,
    subject: Option<String>,
    description: Option<String>,
    status: String,
    brand_id: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    ticket: Ticket,
}

#[derive(Debug, Deserialize)]
struct TicketsPage {
    results: Vec<Ticket>,
    meta: CursorMeta,
}

/// Zendesk client over the shared transport.
pub struct ZendeskClient {
    http: ProviderHttp,
    /// Base URL template with a `{subdomain}` placeholder.
    api_base: String,
    subdomains: Arc<dyn TtlCache<String>>,
}

impl ZendeskClient {
    pub fn new(
        http: ProviderHttp,
        api_base: impl Into<String>,
        subdomains: Arc<dyn TtlCache<String>>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            subdomains,
        }
    }

    fn base(&self, subdomain: &str) -> String {
        self.api_base
            .replace("{subdomain}", subdomain)
            .trim_end_matches('/')
            .to_string()
    }

    fn url(&self, subdomain: &str, path: &str) -> Result<Url, ClientError> {
        self.http.url(&format!("{}{}", self.base(subdomain), path))
    }

    fn account_subdomain<'a>(&self, conn: &'a ConnectionRef) -> Result<&'a str, ClientError> {
        conn.metadata_str("subdomain").ok_or_else(|| {
            ClientError::permanent(ProviderKind::Zendesk, "connector metadata has no subdomain")
        })
    }

    async fn fetch_brand(
        &self,
        conn: &ConnectionRef,
        brand_id: &str,
    ) -> Result<Option<Brand>, ClientError> {
        let url = self.url(
            self.account_subdomain(conn)?,
            &format!("/api/v2/brands/{brand_id}"),
        )?;
        let brand = self
            .http
            .get_json::<BrandResponse>(conn, url)
            .await?
            .map(|f| f.body.brand);
        if let Some(brand) = &brand {
            self.subdomains.set(
                &subdomain_key(conn, brand_id),
                brand.subdomain.clone(),
                SUBDOMAIN_TTL,
            );
        }
        Ok(brand)
    }

    /// Subdomain serving the brand's help center; `None` when the brand is gone.
    async fn brand_subdomain(
        &self,
        conn: &ConnectionRef,
        brand_id: &str,
    ) -> Result<Option<String>, ClientError> {
        if let Some(subdomain) = self.subdomains.get(&subdomain_key(conn, brand_id)) {
            return Ok(Some(subdomain));
        }
        debug!(brand_id, "Resolving Zendesk brand subdomain");
        Ok(self.fetch_brand(conn, brand_id).await?.map(|b| b.subdomain))
    }

    fn paged(&self, mut url: Url, cursor: Option<&str>) -> Url {
        url.query_pairs_mut().append_pair("page[size]", PAGE_SIZE);
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("page[after]", cursor);
        }
        url
    }

    fn ticket_resource(&self, subdomain: &str, ticket: Ticket) -> RemoteResource {
        let mut tags = ticket.tags.iter().map(|t| format!("tag:{t}")).collect::<Vec<_>>();
        tags.push(format!("status:{}", ticket.status));
        RemoteResource {
            kind: Some(NodeKind::ZendeskTicket),
            external_id: ticket.id.to_string(),
            parent_external_id: None,
            title: ticket.subject,
            description: None,
            url: Some(format!("{}/agent/tickets/{}", self.base(subdomain), ticket.id)),
            body: ticket.description,
            state: Some(ticket.status),
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
            tags,
        }
    }
}

fn subdomain_key(conn: &ConnectionRef, brand_id: &str) -> String {
    format!("{}:{}", conn.connector_id, brand_id)
}

fn category_resource(category: Category) -> RemoteResource {
    RemoteResource {
        kind: Some(NodeKind::ZendeskCategory),
        external_id: category.id.to_string(),
        parent_external_id: None,
        title: Some(category.name),
        description: category.description,
        url: category.html_url,
        created_at: category.created_at,
        updated_at: category.updated_at,
        ..Default::default()
    }
}

fn article_resource(article: Article, category_id: Option<&str>) -> RemoteResource {
    RemoteResource {
        kind: Some(NodeKind::ZendeskArticle),
        external_id: article.id.to_string(),
        parent_external_id: category_id.map(str::to_string),
        title: Some(article.title),
        description: None,
        url: article.html_url,
        body: article.body,
        state: Some(if article.draft { "draft" } else { "published" }.to_string()),
        created_at: article.created_at,
        updated_at: article.updated_at,
        tags: article
            .label_names
            .into_iter()
            .map(|l| format!("label:{l}"))
            .collect(),
    }
}

#[async_trait]
impl ProviderClient for ZendeskClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Zendesk
    }

    async fn list_page(
        &self,
        conn: &ConnectionRef,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
    ) -> Result<Page, ClientError> {
        let Some(subdomain) = self
            .brand_subdomain(conn, &parent.scope_external_id)
            .await?
        else {
            return Ok(Page::default());
        };

        match (parent.kind, child_kind) {
            (NodeKind::ZendeskBrand, NodeKind::ZendeskCategory) => {
                let url = self.paged(
                    self.url(&subdomain, "/api/v2/help_center/categories")?,
                    cursor,
                );
                let Some(page) = self.http.get_json::<CategoriesPage>(conn, url).await? else {
                    return Ok(Page::default());
                };
                Ok(Page {
                    items: page.body.categories.into_iter().map(category_resource).collect(),
                    next_cursor: page.body.meta.next(),
                })
            }
            (NodeKind::ZendeskCategory, NodeKind::ZendeskArticle) => {
                let url = self.paged(
                    self.url(
                        &subdomain,
                        &format!(
                            "/api/v2/help_center/categories/{}/articles",
                            parent.external_id
                        ),
                    )?,
                    cursor,
                );
                let Some(page) = self.http.get_json::<ArticlesPage>(conn, url).await? else {
                    return Ok(Page::default());
                };
                Ok(Page {
                    items: page
                        .body
                        .articles
                        .into_iter()
                        .map(|a| article_resource(a, Some(&parent.external_id)))
                        .collect(),
                    next_cursor: page.body.meta.next(),
                })
            }
            (NodeKind::ZendeskBrand, NodeKind::ZendeskTicket) => {
                let mut url = self.paged(self.url(&subdomain, "/api/v2/search/export")?, cursor);
                url.query_pairs_mut()
                    .append_pair("filter[type]", "ticket")
                    .append_pair("query", &format!("brand_id:{}", parent.external_id));
                let Some(page) = self.http.get_json::<TicketsPage>(conn, url).await? else {
                    return Ok(Page::default());
                };
                let brand_id = parent.external_id.parse::<u64>().ok();
                let next_cursor = page.body.meta.next();
                Ok(Page {
                    items: page
                        .body
                        .results
                        .into_iter()
                        .filter(|t| brand_id.is_none() || t.brand_id == brand_id)
                        .map(|t| self.ticket_resource(&subdomain, t))
                        .collect(),
                    next_cursor,
                })
            }
            (_, child) => Err(unsupported(ProviderKind::Zendesk, child)),
        }
    }

    async fn get_one(
        &self,
        conn: &ConnectionRef,
        node: &ResourceRef,
    ) -> Result<Option<RemoteResource>, ClientError> {
        if node.kind == NodeKind::ZendeskBrand {
            return Ok(self.fetch_brand(conn, &node.external_id).await?.map(|brand| {
                RemoteResource {
                    kind: Some(NodeKind::ZendeskBrand),
                    external_id: brand.id.to_string(),
                    title: Some(brand.name),
                    url: brand.brand_url,
                    created_at: brand.created_at,
                    updated_at: brand.updated_at,
                    ..Default::default()
                }
            }));
        }

        let Some(subdomain) = self.brand_subdomain(conn, &node.scope_external_id).await? else {
            return Ok(None);
        };

        match node.kind {
            NodeKind::ZendeskCategory => {
                let url = self.url(
                    &subdomain,
                    &format!("/api/v2/help_center/categories/{}", node.external_id),
                )?;
                Ok(self
                    .http
                    .get_json::<CategoryResponse>(conn, url)
                    .await?
                    .map(|f| category_resource(f.body.category)))
            }
            NodeKind::ZendeskArticle => {
                let url = self.url(
                    &subdomain,
                    &format!("/api/v2/help_center/articles/{}", node.external_id),
                )?;
                Ok(self
                    .http
                    .get_json::<ArticleResponse>(conn, url)
                    .await?
                    .map(|f| article_resource(f.body.article, None)))
            }
            NodeKind::ZendeskTicket => {
                let url = self.url(&subdomain, &format!("/api/v2/tickets/{}", node.external_id))?;
                let Some(fetched) = self.http.get_json::<TicketResponse>(conn, url).await? else {
                    return Ok(None);
                };
                let ticket = fetched.body.ticket;
                // A ticket moved to another brand no longer belongs to this scope.
                let brand_id = node.scope_external_id.parse::<u64>().ok();
                if brand_id.is_some() && ticket.brand_id.is_some() && ticket.brand_id != brand_id {
                    return Ok(None);
                }
                Ok(Some(self.ticket_resource(&subdomain, ticket)))
            }
            kind => Err(unsupported(ProviderKind::Zendesk, kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryTtlCache;
    use crate::credentials::{AccessToken, CredentialError, CredentialSource, TokenProvider};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken;

    #[async_trait]
    impl CredentialSource for StaticToken {
        async fn fetch_access_token(
            &self,
            _connection_id: &str,
            _force_refresh: bool,
        ) -> Result<AccessToken, CredentialError> {
            Ok(AccessToken {
                access_token: "zd-token".into(),
                expires_in: None,
            })
        }
    }

    fn client(server: &MockServer) -> ZendeskClient {
        let tokens = Arc::new(TokenProvider::new(
            Arc::new(StaticToken),
            Arc::new(InMemoryTtlCache::new(4)),
            Duration::from_secs(60),
        ));
        let http =
            ProviderHttp::new(ProviderKind::Zendesk, tokens, Duration::from_secs(5)).unwrap();
        // Every subdomain resolves to the mock server.
        ZendeskClient::new(http, server.uri(), Arc::new(InMemoryTtlCache::new(16)))
    }

    fn conn() -> ConnectionRef {
        ConnectionRef {
            connector_id: uuid::Uuid::new_v4(),
            connection_id: "conn".into(),
            metadata: serde_json::json!({ "subdomain": "acme" }),
        }
    }

    async fn mount_brand(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v2/brands/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "brand": {
                    "id": 42,
                    "name": "Acme Support",
                    "subdomain": "acme-support",
                    "brand_url": "https://acme-support.zendesk.com",
                    "created_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-02-01T00:00:00Z"
                }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn lists_categories_with_cursor_pagination() {
        let server = MockServer::start().await;
        mount_brand(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/help_center/categories"))
            .and(query_param("page[after]", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "categories": [{"id": 7, "name": "FAQ", "description": null, "html_url": null}],
                "meta": {"has_more": true, "after_cursor": "def"}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let conn = conn();
        let brand = ResourceRef::scope(NodeKind::ZendeskBrand, "42");
        let page = client
            .list_page(&conn, &brand, NodeKind::ZendeskCategory, Some("abc"))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].external_id, "7");
        assert_eq!(page.items[0].title.as_deref(), Some("FAQ"));
        assert_eq!(page.next_cursor.as_deref(), Some("def"));

        // The brand subdomain is now cached: the brand mock expects one call.
        client
            .list_page(&conn, &brand, NodeKind::ZendeskCategory, Some("abc"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ticket_of_another_brand_is_not_found() {
        let server = MockServer::start().await;
        mount_brand(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ticket": {
                    "id": 5, "subject": "Help", "description": "Broken",
                    "status": "solved", "brand_id": 43
                }
            })))
            .mount(&server)
            .await;

        let ticket = ResourceRef::new(NodeKind::ZendeskTicket, "5", "42");
        let found = client(&server).get_one(&conn(), &ticket).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn draft_articles_carry_their_state() {
        let server = MockServer::start().await;
        mount_brand(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/help_center/articles/99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "article": {
                    "id": 99, "title": "Reset password", "body": "<p>Steps</p>",
                    "draft": true, "updated_at": "2024-03-01T10:00:00Z"
                }
            })))
            .mount(&server)
            .await;

        let article = ResourceRef::new(NodeKind::ZendeskArticle, "99", "42");
        let found = client(&server)
            .get_one(&conn(), &article)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.state.as_deref(), Some("draft"));
        assert_eq!(found.body.as_deref(), Some("<p>Steps</p>"));
    }
}
