//! Provider access-token retrieval.
//!
//! OAuth material lives in a separate credential service; the sync core only
//! ever asks it for a current access token. [`TokenProvider`] memoizes tokens
//! in an injected [`TtlCache`] and supports a forced refresh that bypasses the
//! cache, which provider clients use after an unexpected 401.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::cache::TtlCache;

/// Failures of the credential source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The grant is gone; retrying with the same connection is pointless.
    #[error("access for connection {connection_id} was revoked: {message}")]
    Revoked {
        connection_id: String,
        message: String,
    },
    #[error("credential service rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("credential service unavailable: {0}")]
    Transient(String),
}

/// Classification of a credential service error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFailureClass {
    Revoked,
    RateLimited,
    Transient,
}

/// Classifies an error body returned by the credential service.
pub fn classify_credential_error(body: &str) -> CredentialFailureClass {
    let lower = body.to_lowercase();

    if lower.contains("invalid_grant")
        || lower.contains("invalid_client")
        || lower.contains("unauthorized_client")
        || lower.contains("revoked")
        || lower.contains("access_denied")
        || lower.contains("unsupported_grant_type")
    {
        return CredentialFailureClass::Revoked;
    }

    if lower.contains("rate_limit")
        || lower.contains("too_many_requests")
        || lower.contains("quota_exceeded")
    {
        return CredentialFailureClass::RateLimited;
    }

    CredentialFailureClass::Transient
}

/// Access token with its advertised lifetime.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Source of provider access tokens for a connection.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch_access_token(
        &self,
        connection_id: &str,
        force_refresh: bool,
    ) -> Result<AccessToken, CredentialError>;
}

/// Credential service reached over HTTP:
/// `GET {base}/connections/{id}/access_token[?force_refresh=true]`.
pub struct HttpCredentialSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCredentialSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn token_url(&self, connection_id: &str, force_refresh: bool) -> Result<Url, CredentialError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| CredentialError::Transient(format!("invalid credentials url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CredentialError::Transient("credentials url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["connections", connection_id, "access_token"]);
        if force_refresh {
            url.query_pairs_mut().append_pair("force_refresh", "true");
        }
        Ok(url)
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch_access_token(
        &self,
        connection_id: &str,
        force_refresh: bool,
    ) -> Result<AccessToken, CredentialError> {
        let url = self.token_url(connection_id, force_refresh)?;
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CredentialError::Transient(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<AccessToken>()
                .await
                .map_err(|e| CredentialError::Transient(format!("malformed token response: {e}")));
        }

        let retry_after_secs = response
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        if matches!(status.as_u16(), 401 | 403 | 410) {
            return Err(CredentialError::Revoked {
                connection_id: connection_id.to_string(),
                message: format!("{status}: {body}"),
            });
        }
        if status.as_u16() == 429 {
            return Err(CredentialError::RateLimited { retry_after_secs });
        }

        match classify_credential_error(&body) {
            CredentialFailureClass::Revoked => Err(CredentialError::Revoked {
                connection_id: connection_id.to_string(),
                message: body,
            }),
            CredentialFailureClass::RateLimited => {
                Err(CredentialError::RateLimited { retry_after_secs })
            }
            CredentialFailureClass::Transient => {
                Err(CredentialError::Transient(format!("{status}: {body}")))
            }
        }
    }
}

/// Caching front for a [`CredentialSource`].
pub struct TokenProvider {
    source: Arc<dyn CredentialSource>,
    cache: Arc<dyn TtlCache<String>>,
    default_ttl: Duration,
}

impl TokenProvider {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        cache: Arc<dyn TtlCache<String>>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            default_ttl,
        }
    }

    /// Returns a token for `connection_id`, from cache unless `force_refresh`.
    pub async fn get_access_token(
        &self,
        connection_id: &str,
        force_refresh: bool,
    ) -> Result<String, CredentialError> {
        if !force_refresh {
            if let Some(token) = self.cache.get(connection_id) {
                return Ok(token);
            }
        } else {
            self.cache.invalidate(connection_id);
        }

        match self
            .source
            .fetch_access_token(connection_id, force_refresh)
            .await
        {
            Ok(token) => {
                // Expire a little early so a cached token never outlives the real one.
                let ttl = token
                    .expires_in
                    .map(|secs| Duration::from_secs(secs.saturating_sub(30)))
                    .map(|ttl| ttl.min(self.default_ttl))
                    .unwrap_or(self.default_ttl);
                debug!(
                    connection_id,
                    force_refresh,
                    ttl_secs = ttl.as_secs(),
                    "Fetched access token"
                );
                self.cache.set(connection_id, token.access_token.clone(), ttl);
                Ok(token.access_token)
            }
            Err(err) => {
                if matches!(err, CredentialError::Revoked { .. }) {
                    warn!(connection_id, error = %err, "Access token revoked");
                    counter!("credential_revocations_total").increment(1);
                    self.cache.invalidate(connection_id);
                }
                Err(err)
            }
        }
    }
}
