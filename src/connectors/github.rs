//! GitHub API client
//!
//! Repositories are the sync scope and issues their leaves. Pull requests come
//! back from the issues endpoint too and are dropped. Listing follows the
//! `Link` header; the cursor is the full URL of the next page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::http::{ProviderHttp, parse_link_header};
use super::trait_::{
    ClientError, ConnectionRef, Page, ProviderClient, RemoteResource, ResourceRef, unsupported,
};
use crate::provider::{NodeKind, ProviderKind};

#[derive(Debug, Deserialize)]
struct Repository {
    id: u64,
    full_name: String,
    description: Option<String>,
    html_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    html_url: Option<String>,
    user: Option<User>,
    #[serde(default)]
    labels: Vec<Label>,
    pull_request: Option<serde_json::Value>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

fn issue_resource(issue: Issue) -> RemoteResource {
    let mut tags: Vec<String> = issue
        .labels
        .into_iter()
        .map(|l| format!("label:{}", l.name))
        .collect();
    if let Some(user) = issue.user {
        tags.push(format!("author:{}", user.login));
    }
    RemoteResource {
        kind: Some(NodeKind::GithubIssue),
        external_id: issue.number.to_string(),
        parent_external_id: None,
        title: Some(issue.title),
        description: None,
        url: issue.html_url,
        body: issue.body,
        state: Some(issue.state),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        tags,
    }
}

pub struct GithubClient {
    http: ProviderHttp,
    api_base: String,
}

impl GithubClient {
    pub fn new(http: ProviderHttp, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for GithubClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Github
    }

    async fn list_page(
        &self,
        conn: &ConnectionRef,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
    ) -> Result<Page, ClientError> {
        if (parent.kind, child_kind) != (NodeKind::GithubRepo, NodeKind::GithubIssue) {
            return Err(unsupported(ProviderKind::Github, child_kind));
        }

        let url = match cursor {
            Some(next) => self.http.url(next)?,
            None => {
                let mut url = self.http.url(&format!(
                    "{}/repositories/{}/issues",
                    self.api_base, parent.external_id
                ))?;
                url.query_pairs_mut()
                    .append_pair("state", "all")
                    .append_pair("sort", "updated")
                    .append_pair("direction", "desc")
                    .append_pair("per_page", "100");
                url
            }
        };

        let Some(fetched) = self.http.get_json::<Vec<Issue>>(conn, url).await? else {
            return Ok(Page::default());
        };
        let next_cursor = fetched
            .headers
            .get("Link")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_link_header);
        let items = fetched
            .body
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(issue_resource)
            .collect();
        Ok(Page { items, next_cursor })
    }

    async fn get_one(
        &self,
        conn: &ConnectionRef,
        node: &ResourceRef,
    ) -> Result<Option<RemoteResource>, ClientError> {
        match node.kind {
            NodeKind::GithubRepo => {
                let url = self
                    .http
                    .url(&format!("{}/repositories/{}", self.api_base, node.external_id))?;
                Ok(self
                    .http
                    .get_json::<Repository>(conn, url)
                    .await?
                    .map(|f| RemoteResource {
                        kind: Some(NodeKind::GithubRepo),
                        external_id: f.body.id.to_string(),
                        title: Some(f.body.full_name),
                        description: f.body.description,
                        url: f.body.html_url,
                        created_at: f.body.created_at,
                        updated_at: f.body.updated_at,
                        ..Default::default()
                    }))
            }
            NodeKind::GithubIssue => {
                let url = self.http.url(&format!(
                    "{}/repositories/{}/issues/{}",
                    self.api_base, node.scope_external_id, node.external_id
                ))?;
                Ok(self
                    .http
                    .get_json::<Issue>(conn, url)
                    .await?
                    .map(|f| f.body)
                    .filter(|issue| issue.pull_request.is_none())
                    .map(issue_resource))
            }
            kind => Err(unsupported(ProviderKind::Github, kind)),
        }
    }
}
