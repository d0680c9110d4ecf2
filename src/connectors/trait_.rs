//! Provider client trait definition
//!
//! Defines the interface every provider API client implements. The walker,
//! engine and garbage collector are written once against this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::credentials::CredentialError;
use crate::models::connector::Model as Connector;
use crate::provider::{NodeKind, ProviderKind};

/// Provider call failures.
///
/// Not-found is not an error: clients return `Ok(None)` for it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{provider} rate limited the request (retry after {retry_after_secs:?}s)")]
    RateLimited {
        provider: ProviderKind,
        retry_after_secs: Option<u64>,
    },
    #[error("transient {provider} failure: {message}")]
    Transient {
        provider: ProviderKind,
        message: String,
    },
    #[error("{provider} rejected the access token: {message}")]
    AuthRevoked {
        provider: ProviderKind,
        message: String,
    },
    #[error("{provider} request failed permanently (status {status:?}): {message}")]
    Permanent {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },
    #[error("malformed {provider} response: {message}")]
    Malformed {
        provider: ProviderKind,
        message: String,
    },
}

impl ClientError {
    pub fn transient(provider: ProviderKind, message: impl Into<String>) -> Self {
        ClientError::Transient {
            provider,
            message: message.into(),
        }
    }

    pub fn permanent(provider: ProviderKind, message: impl Into<String>) -> Self {
        ClientError::Permanent {
            provider,
            status: None,
            message: message.into(),
        }
    }

    pub fn malformed(provider: ProviderKind, message: impl Into<String>) -> Self {
        ClientError::Malformed {
            provider,
            message: message.into(),
        }
    }

    /// Maps a credential service failure into the provider's error space.
    pub fn from_credential(provider: ProviderKind, err: CredentialError) -> Self {
        match err {
            CredentialError::Revoked { message, .. } => {
                ClientError::AuthRevoked { provider, message }
            }
            CredentialError::RateLimited { retry_after_secs } => ClientError::RateLimited {
                provider,
                retry_after_secs,
            },
            CredentialError::Transient(message) => ClientError::Transient { provider, message },
        }
    }

    pub fn is_auth_revoked(&self) -> bool {
        matches!(self, ClientError::AuthRevoked { .. })
    }
}

/// The connection a provider call is made on behalf of.
#[derive(Debug, Clone)]
pub struct ConnectionRef {
    pub connector_id: Uuid,
    pub connection_id: String,
    pub metadata: serde_json::Value,
}

impl ConnectionRef {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

impl From<&Connector> for ConnectionRef {
    fn from(connector: &Connector) -> Self {
        Self {
            connector_id: connector.id,
            connection_id: connector.connection_id.clone(),
            metadata: connector
                .metadata
                .clone()
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Reference to a provider node. `scope_external_id` locates the owning scope,
/// which some providers need to address nested resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: NodeKind,
    pub external_id: String,
    pub scope_external_id: String,
}

impl ResourceRef {
    pub fn new(
        kind: NodeKind,
        external_id: impl Into<String>,
        scope_external_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
            scope_external_id: scope_external_id.into(),
        }
    }

    pub fn scope(kind: NodeKind, external_id: impl Into<String>) -> Self {
        let external_id = external_id.into();
        Self {
            kind,
            scope_external_id: external_id.clone(),
            external_id,
        }
    }
}

/// Provider-agnostic shape of an upstream node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub kind: Option<NodeKind>,
    pub external_id: String,
    /// Parent container, `None` when the node hangs off the scope root.
    pub parent_external_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    /// Renderable body; empty for nodes without content.
    pub body: Option<String>,
    /// Upstream lifecycle state (`published`, `draft`, `solved`, `deleted`...).
    pub state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Extra provider tags (`labels:bug`, `author:octocat`).
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RemoteResource {
    pub fn new(kind: NodeKind, external_id: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn node_kind(&self) -> Option<NodeKind> {
        self.kind
    }
}

/// One page of children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<RemoteResource>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn last(items: Vec<RemoteResource>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// Trait that all provider clients implement.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Lists one page of children of kind `child_kind` below `parent`.
    async fn list_page(
        &self,
        conn: &ConnectionRef,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
    ) -> Result<Page, ClientError>;

    /// Fetches a single node; `Ok(None)` when it no longer exists upstream.
    async fn get_one(
        &self,
        conn: &ConnectionRef,
        node: &ResourceRef,
    ) -> Result<Option<RemoteResource>, ClientError>;
}

/// Error for kinds a client is asked about but does not serve.
pub(crate) fn unsupported(provider: ProviderKind, kind: NodeKind) -> ClientError {
    ClientError::permanent(provider, format!("{kind} is not served by the {provider} client"))
}
