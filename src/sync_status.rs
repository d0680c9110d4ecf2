//! Connector-level sync bookkeeping and cancellation.
//!
//! The only user-visible failure surface is the connector row: last sync
//! status, finish time and error kind. Individual resource failures never end
//! up here.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::connector;
use crate::repositories::{ConnectorRepository, StoreError};

/// Outcome recorded in `last_sync_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Succeeded,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Succeeded => "succeeded",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Error kind persisted in `error_type` when a sync fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorErrorType {
    OauthTokenRevoked,
    ThirdPartyInternalError,
    ThirdPartyRateLimited,
    ThirdPartyPermissionDenied,
    Cancelled,
    InternalError,
}

impl ConnectorErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorErrorType::OauthTokenRevoked => "oauth_token_revoked",
            ConnectorErrorType::ThirdPartyInternalError => "third_party_internal_error",
            ConnectorErrorType::ThirdPartyRateLimited => "third_party_rate_limited",
            ConnectorErrorType::ThirdPartyPermissionDenied => "third_party_permission_denied",
            ConnectorErrorType::Cancelled => "cancelled",
            ConnectorErrorType::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ConnectorErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub async fn sync_started(
    connectors: &ConnectorRepository,
    connector_id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    connectors.record_sync_started(connector_id, at).await?;
    info!(connector_id = %connector_id, "Sync started");
    Ok(())
}

/// Marks the sync as succeeded and clears any previous error kind.
pub async fn sync_succeeded(
    connectors: &ConnectorRepository,
    connector_id: Uuid,
    at: DateTime<Utc>,
) -> Result<connector::Model, StoreError> {
    let row = connectors
        .record_sync_finished(connector_id, SyncStatus::Succeeded.as_str(), None, at)
        .await?;
    info!(connector_id = %connector_id, "Sync succeeded");
    Ok(row)
}

pub async fn sync_failed(
    connectors: &ConnectorRepository,
    connector_id: Uuid,
    error_type: ConnectorErrorType,
    at: DateTime<Utc>,
) -> Result<connector::Model, StoreError> {
    let row = connectors
        .record_sync_finished(
            connector_id,
            SyncStatus::Failed.as_str(),
            Some(error_type.as_str()),
            at,
        )
        .await?;
    warn!(connector_id = %connector_id, error_type = %error_type, "Sync failed");
    Ok(row)
}

/// Per-connector cancellation signals shared by every in-flight activity.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Current token for the connector. A cancelled token stays cancelled
    /// until [`reset`](Self::reset) is called.
    pub fn token(&self, connector_id: Uuid) -> CancellationToken {
        self.lock().entry(connector_id).or_default().clone()
    }

    /// Cancels every activity holding the connector's token.
    pub fn cancel(&self, connector_id: Uuid) {
        self.token(connector_id).cancel();
    }

    pub fn is_cancelled(&self, connector_id: Uuid) -> bool {
        self.lock()
            .get(&connector_id)
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Starts a fresh cancellation scope, used when a new sync begins.
    pub fn reset(&self, connector_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(connector_id, token.clone());
        token
    }
}
