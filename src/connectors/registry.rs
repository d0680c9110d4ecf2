//! Provider client lookup
//!
//! A plain map from [`ProviderKind`] to its client, built once at startup and
//! handed to the engine. Tests register stubs for the providers they exercise.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::http::ProviderHttp;
use super::notion::notion_headers;
use super::trait_::{ClientError, ProviderClient};
use super::{GithubClient, IntercomClient, NotionClient, SlackClient, ZendeskClient};
use crate::cache::InMemoryTtlCache;
use crate::config::AppConfig;
use crate::credentials::TokenProvider;
use crate::provider::ProviderKind;

/// Error type for lookups
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("no client registered for provider '{0}'")]
    ProviderNotFound(ProviderKind),
}

/// Clients keyed by provider.
#[derive(Clone, Default)]
pub struct ProviderClients {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
}

impl ProviderClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client under the provider it reports.
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn with(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.register(client);
        self
    }

    pub fn get(&self, provider: ProviderKind) -> Result<Arc<dyn ProviderClient>, RegistryError> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or(RegistryError::ProviderNotFound(provider))
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut providers: Vec<_> = self.clients.keys().copied().collect();
        providers.sort();
        providers
    }

    /// Builds the HTTP clients for every supported provider.
    pub fn from_config(
        config: &AppConfig,
        tokens: Arc<TokenProvider>,
    ) -> Result<Self, ClientError> {
        let timeout = config.request_timeout();
        let api = &config.provider_api;
        let http = |provider| ProviderHttp::new(provider, tokens.clone(), timeout);

        let clients = Self::new()
            .with(Arc::new(ZendeskClient::new(
                http(ProviderKind::Zendesk)?,
                api.zendesk_api_base.clone(),
                Arc::new(InMemoryTtlCache::new(config.token_cache.capacity)),
            )))
            .with(Arc::new(IntercomClient::new(
                http(ProviderKind::Intercom)?,
                api.intercom_api_base.clone(),
            )))
            .with(Arc::new(GithubClient::new(
                http(ProviderKind::Github)?,
                api.github_api_base.clone(),
            )))
            .with(Arc::new(SlackClient::new(
                http(ProviderKind::Slack)?,
                api.slack_api_base.clone(),
            )))
            .with(Arc::new(NotionClient::new(
                ProviderHttp::with_headers(
                    ProviderKind::Notion,
                    tokens.clone(),
                    timeout,
                    notion_headers(),
                )?,
                api.notion_api_base.clone(),
            )));

        info!(providers = ?clients.providers(), "Provider clients ready");
        Ok(clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{AccessToken, CredentialError, CredentialSource};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoTokens;

    #[async_trait]
    impl CredentialSource for NoTokens {
        async fn fetch_access_token(
            &self,
            connection_id: &str,
            _force_refresh: bool,
        ) -> Result<AccessToken, CredentialError> {
            Err(CredentialError::Revoked {
                connection_id: connection_id.to_string(),
                message: "test".into(),
            })
        }
    }

    #[test]
    fn every_provider_gets_a_client() {
        let tokens = Arc::new(TokenProvider::new(
            Arc::new(NoTokens),
            Arc::new(InMemoryTtlCache::new(1)),
            Duration::from_secs(1),
        ));
        let clients = ProviderClients::from_config(&AppConfig::default(), tokens).unwrap();

        for provider in ProviderKind::ALL {
            assert_eq!(clients.get(provider).unwrap().provider(), provider);
        }
    }

    #[test]
    fn unknown_provider_is_reported() {
        let clients = ProviderClients::new();
        assert!(matches!(
            clients.get(ProviderKind::Slack),
            Err(RegistryError::ProviderNotFound(ProviderKind::Slack))
        ));
    }
}
