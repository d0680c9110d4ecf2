//! Slack Web API client
//!
//! Slack answers most failures with HTTP 200 and `{"ok": false, "error": ...}`,
//! so every response goes through [`check_ok`] before it is decoded. Threads are
//! addressed as `{channel_id}-{thread_ts}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::http::ProviderHttp;
use super::trait_::{
    ClientError, ConnectionRef, Page, ProviderClient, RemoteResource, ResourceRef, unsupported,
};
use crate::provider::{NodeKind, ProviderKind};

const NOT_FOUND_ERRORS: &[&str] = &["channel_not_found", "thread_not_found", "team_not_found"];
const REVOKED_ERRORS: &[&str] = &[
    "invalid_auth",
    "token_revoked",
    "account_inactive",
    "not_authed",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Team {
    id: String,
    name: String,
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TeamInfo {
    team: Team,
}

#[derive(Debug, Deserialize)]
struct Purpose {
    value: String,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    name: Option<String>,
    purpose: Option<Purpose>,
    created: Option<i64>,
    #[serde(default)]
    is_archived: bool,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct Message {
    ts: String,
    text: Option<String>,
    user: Option<String>,
    thread_ts: Option<String>,
    latest_reply: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    messages: Vec<Message>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

/// Outcome of Slack's in-body error signalling.
#[derive(Debug, PartialEq, Eq)]
enum SlackOutcome {
    Ok,
    NotFound,
}

fn check_ok(body: &serde_json::Value) -> Result<SlackOutcome, ClientError> {
    let envelope: Envelope = serde_json::from_value(body.clone())
        .map_err(|e| ClientError::malformed(ProviderKind::Slack, e.to_string()))?;
    if envelope.ok {
        return Ok(SlackOutcome::Ok);
    }
    let error = envelope.error.unwrap_or_else(|| "unknown_error".to_string());
    if NOT_FOUND_ERRORS.contains(&error.as_str()) {
        return Ok(SlackOutcome::NotFound);
    }
    if REVOKED_ERRORS.contains(&error.as_str()) {
        return Err(ClientError::AuthRevoked {
            provider: ProviderKind::Slack,
            message: error,
        });
    }
    if error == "ratelimited" {
        return Err(ClientError::RateLimited {
            provider: ProviderKind::Slack,
            retry_after_secs: None,
        });
    }
    Err(ClientError::permanent(ProviderKind::Slack, error))
}

/// Converts a Slack `ts` (`"1700000000.000100"`) into a timestamp.
fn ts_to_datetime(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, micros) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs = secs.parse::<i64>().ok()?;
    let micros = micros.parse::<u32>().unwrap_or(0);
    DateTime::from_timestamp(secs, micros.saturating_mul(1_000))
}

fn thread_id(channel_id: &str, ts: &str) -> String {
    format!("{channel_id}-{ts}")
}

fn split_thread_id(external_id: &str) -> Option<(&str, &str)> {
    external_id.split_once('-')
}

fn channel_resource(channel: Channel) -> RemoteResource {
    RemoteResource {
        kind: Some(NodeKind::SlackChannel),
        external_id: channel.id,
        parent_external_id: None,
        title: channel.name.map(|n| format!("#{n}")),
        description: channel.purpose.map(|p| p.value).filter(|p| !p.is_empty()),
        created_at: channel.created.and_then(|c| DateTime::from_timestamp(c, 0)),
        ..Default::default()
    }
}

fn render_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| {
            let text = m.text.as_deref()?.trim();
            if text.is_empty() {
                return None;
            }
            Some(match &m.user {
                Some(user) => format!("<@{user}>: {text}"),
                None => text.to_string(),
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct SlackClient {
    http: ProviderHttp,
    api_base: String,
}

impl SlackClient {
    pub fn new(http: ProviderHttp, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn method_url(&self, method: &str, params: &[(&str, &str)]) -> Result<Url, ClientError> {
        let mut url = self.http.url(&format!("{}/{}", self.api_base, method))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Calls a Web API method; `Ok(None)` for not-found style errors.
    async fn call<T: DeserializeOwned>(
        &self,
        conn: &ConnectionRef,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<T>, ClientError> {
        let url = self.method_url(method, params)?;
        let Some(fetched) = self.http.get_json::<serde_json::Value>(conn, url).await? else {
            return Ok(None);
        };
        if check_ok(&fetched.body)? == SlackOutcome::NotFound {
            return Ok(None);
        }
        serde_json::from_value(fetched.body)
            .map(Some)
            .map_err(|e| ClientError::malformed(ProviderKind::Slack, e.to_string()))
    }
}

#[async_trait]
impl ProviderClient for SlackClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Slack
    }

    async fn list_page(
        &self,
        conn: &ConnectionRef,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
    ) -> Result<Page, ClientError> {
        let cursor = cursor.unwrap_or("");
        match (parent.kind, child_kind) {
            (NodeKind::SlackWorkspace, NodeKind::SlackChannel) => {
                let Some(list) = self
                    .call::<ChannelList>(
                        conn,
                        "conversations.list",
                        &[
                            ("types", "public_channel"),
                            ("exclude_archived", "true"),
                            ("limit", "200"),
                            ("cursor", cursor),
                        ],
                    )
                    .await?
                else {
                    return Ok(Page::default());
                };
                Ok(Page {
                    items: list.channels.into_iter().map(channel_resource).collect(),
                    next_cursor: list.response_metadata.next_cursor.filter(|c| !c.is_empty()),
                })
            }
            (NodeKind::SlackChannel, NodeKind::SlackThread) => {
                let channel_id = parent.external_id.as_str();
                let Some(list) = self
                    .call::<MessageList>(
                        conn,
                        "conversations.history",
                        &[("channel", channel_id), ("limit", "100"), ("cursor", cursor)],
                    )
                    .await?
                else {
                    return Ok(Page::default());
                };
                // Only thread roots become documents; replies are folded in on fetch.
                let items = list
                    .messages
                    .into_iter()
                    .filter(|m| m.thread_ts.as_deref().is_none_or(|t| t == m.ts))
                    .map(|m| {
                        let latest = m.latest_reply.as_deref().unwrap_or(&m.ts);
                        RemoteResource {
                            kind: Some(NodeKind::SlackThread),
                            external_id: thread_id(channel_id, &m.ts),
                            parent_external_id: Some(channel_id.to_string()),
                            title: m.text.as_deref().map(|t| t.chars().take(80).collect()),
                            created_at: ts_to_datetime(&m.ts),
                            updated_at: ts_to_datetime(latest),
                            ..Default::default()
                        }
                    })
                    .collect();
                Ok(Page {
                    items,
                    next_cursor: list.response_metadata.next_cursor.filter(|c| !c.is_empty()),
                })
            }
            (_, child) => Err(unsupported(ProviderKind::Slack, child)),
        }
    }

    async fn get_one(
        &self,
        conn: &ConnectionRef,
        node: &ResourceRef,
    ) -> Result<Option<RemoteResource>, ClientError> {
        match node.kind {
            NodeKind::SlackWorkspace => Ok(self
                .call::<TeamInfo>(conn, "team.info", &[("team", node.external_id.as_str())])
                .await?
                .map(|info| RemoteResource {
                    kind: Some(NodeKind::SlackWorkspace),
                    external_id: info.team.id,
                    title: Some(info.team.name),
                    url: info.team.domain.map(|d| format!("https://{d}.slack.com")),
                    ..Default::default()
                })),
            NodeKind::SlackChannel => Ok(self
                .call::<ChannelInfo>(
                    conn,
                    "conversations.info",
                    &[("channel", node.external_id.as_str())],
                )
                .await?
                .map(|info| info.channel)
                .filter(|channel| !channel.is_archived)
                .map(channel_resource)),
            NodeKind::SlackThread => {
                let Some((channel_id, ts)) = split_thread_id(&node.external_id) else {
                    return Ok(None);
                };
                let Some(replies) = self
                    .call::<MessageList>(
                        conn,
                        "conversations.replies",
                        &[("channel", channel_id), ("ts", ts), ("limit", "200")],
                    )
                    .await?
                else {
                    return Ok(None);
                };
                let Some(root) = replies.messages.first() else {
                    return Ok(None);
                };
                let updated_at = replies
                    .messages
                    .iter()
                    .filter_map(|m| ts_to_datetime(&m.ts))
                    .max();
                Ok(Some(RemoteResource {
                    kind: Some(NodeKind::SlackThread),
                    external_id: node.external_id.clone(),
                    parent_external_id: Some(channel_id.to_string()),
                    title: root.text.as_deref().map(|t| t.chars().take(80).collect()),
                    body: Some(render_messages(&replies.messages)),
                    created_at: ts_to_datetime(&root.ts),
                    updated_at,
                    ..Default::default()
                }))
            }
            kind => Err(unsupported(ProviderKind::Slack, kind)),
        }
    }
}
