//! Shared HTTP transport for provider clients.
//!
//! Every provider call goes through [`ProviderHttp`], which attaches the
//! connection's bearer token, enforces the request timeout and maps HTTP
//! statuses onto [`ClientError`]. Rate limits are surfaced, never retried here.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::trait_::{ClientError, ConnectionRef};
use crate::credentials::TokenProvider;
use crate::provider::ProviderKind;

const USER_AGENT: &str = "provider-sync/0.1";

/// Successful response body together with the headers pagination may need.
#[derive(Debug)]
pub struct Fetched<T> {
    pub body: T,
    pub headers: HeaderMap,
}

/// Authenticated, status-mapping HTTP client for one provider.
#[derive(Clone)]
pub struct ProviderHttp {
    provider: ProviderKind,
    client: reqwest::Client,
    tokens: Arc<TokenProvider>,
}

impl ProviderHttp {
    pub fn new(
        provider: ProviderKind,
        tokens: Arc<TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Self::with_headers(provider, tokens, timeout, HeaderMap::new())
    }

    /// Same as [`ProviderHttp::new`] with headers sent on every request
    /// (API version pins and the like).
    pub fn with_headers(
        provider: ProviderKind,
        tokens: Arc<TokenProvider>,
        timeout: Duration,
        headers: HeaderMap,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::permanent(provider, format!("http client: {e}")))?;
        Ok(Self {
            provider,
            client,
            tokens,
        })
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Parses a URL, reporting failures as permanent for this provider.
    pub fn url(&self, raw: &str) -> Result<Url, ClientError> {
        Url::parse(raw)
            .map_err(|e| ClientError::permanent(self.provider, format!("bad url {raw}: {e}")))
    }

    /// `GET` returning `None` on 404/410.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        conn: &ConnectionRef,
        url: Url,
    ) -> Result<Option<Fetched<T>>, ClientError> {
        self.send_json(conn, Method::GET, url, None).await
    }

    /// `POST` with a JSON body, returning `None` on 404/410.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        conn: &ConnectionRef,
        url: Url,
        body: serde_json::Value,
    ) -> Result<Option<Fetched<T>>, ClientError> {
        self.send_json(conn, Method::POST, url, Some(body)).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        conn: &ConnectionRef,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<Option<Fetched<T>>, ClientError> {
        let token = self
            .tokens
            .get_access_token(&conn.connection_id, false)
            .await
            .map_err(|e| ClientError::from_credential(self.provider, e))?;
        let mut response = self
            .build(method.clone(), url.clone(), &token, body.as_ref())
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        // A 401 on a cached token may just mean it rotated: refresh once.
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(provider = %self.provider, "401 from provider, forcing token refresh");
            let token = self
                .tokens
                .get_access_token(&conn.connection_id, true)
                .await
                .map_err(|e| ClientError::from_credential(self.provider, e))?;
            response = self
                .build(method, url, &token, body.as_ref())
                .send()
                .await
                .map_err(|e| self.network_error(e))?;
        }

        counter!(
            "provider_requests_total",
            "provider" => self.provider.as_str(),
            "status" => response.status().as_u16().to_string()
        )
        .increment(1);

        let Some(response) = self.check_status(response).await? else {
            return Ok(None);
        };
        let headers = response.headers().clone();
        let body = response
            .json::<T>()
            .await
            .map_err(|e| ClientError::malformed(self.provider, e.to_string()))?;
        Ok(Some(Fetched { body, headers }))
    }

    fn build(
        &self,
        method: Method,
        url: Url,
        token: &str,
        body: Option<&serde_json::Value>,
    ) -> RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/json");
        match body {
            Some(body) => request.json(body),
            None => request,
        }
    }

    fn network_error(&self, err: reqwest::Error) -> ClientError {
        ClientError::transient(self.provider, err.to_string())
    }

    /// Maps non-success statuses; `Ok(None)` means the resource is gone.
    async fn check_status(&self, response: Response) -> Result<Option<Response>, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        let provider = self.provider;

        match status.as_u16() {
            404 | 410 => Ok(None),
            429 => {
                let retry_after_secs = retry_after(response.headers());
                warn!(provider = %provider, ?retry_after_secs, "Provider rate limit hit");
                Err(ClientError::RateLimited {
                    provider,
                    retry_after_secs,
                })
            }
            401 => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::AuthRevoked {
                    provider,
                    message: format!("401 Unauthorized: {body}"),
                })
            }
            403 => {
                let remaining = response
                    .headers()
                    .get("X-RateLimit-Remaining")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                if remaining == Some(0) {
                    warn!(provider = %provider, "Provider quota exhausted (403)");
                    Err(ClientError::RateLimited {
                        provider,
                        retry_after_secs: retry_after(response.headers()),
                    })
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(ClientError::Permanent {
                        provider,
                        status: Some(403),
                        message: body,
                    })
                }
            }
            500..=599 => {
                let body = response.text().await.unwrap_or_default();
                warn!(provider = %provider, status = status.as_u16(), "Provider server error");
                Err(ClientError::transient(provider, format!("{status}: {body}")))
            }
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::Permanent {
                    provider,
                    status: Some(code),
                    message: body,
                })
            }
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Extracts the `rel="next"` target of an RFC 8288 `Link` header.
pub fn parse_link_header(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|link| {
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|p| p.trim() == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let start = target.find('<')?;
        let end = target.find('>')?;
        Some(target[start + 1..end].to_string())
    })
}
