//! # Error Handling
//!
//! Each layer has its own error enum; they converge into [`SyncError`] inside
//! the engine and leave the crate as [`ActivityFailure`], the serializable
//! shape the driver decides on (retry, cancel, alert).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::connectors::{ClientError, RegistryError};
use crate::documents::DocumentStoreError;
use crate::provider::ParseKindError;
use crate::repositories::StoreError;
use crate::sync_status::ConnectorErrorType;

/// Everything that can abort a unit of work.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("corrupt state row: {0}")]
    CorruptRow(#[from] ParseKindError),

    #[error("sync of connector {0} was cancelled")]
    Cancelled(Uuid),

    #[error("all {failed} items of the batch failed; first error: {first_error}")]
    BatchFailed { failed: usize, first_error: String },

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl SyncError {
    /// Whether the driver may retry the unit of work as is.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Client(err) => matches!(
                err,
                ClientError::RateLimited { .. } | ClientError::Transient { .. }
            ),
            SyncError::Documents(err) => err.is_retryable(),
            SyncError::Store(StoreError::Db(_)) => true,
            SyncError::BatchFailed { .. } => true,
            SyncError::Store(_)
            | SyncError::Registry(_)
            | SyncError::CorruptRow(_)
            | SyncError::Cancelled(_)
            | SyncError::Invalid(_) => false,
        }
    }

    /// Provider-advertised wait, when there is one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SyncError::Client(ClientError::RateLimited {
                retry_after_secs, ..
            }) => *retry_after_secs,
            _ => None,
        }
    }

    pub fn is_auth_revoked(&self) -> bool {
        matches!(self, SyncError::Client(ClientError::AuthRevoked { .. }))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::Client(ClientError::RateLimited { .. }))
    }

    /// Connector-level error kind persisted when this error ends a sync.
    pub fn connector_error_type(&self) -> ConnectorErrorType {
        match self {
            SyncError::Client(ClientError::AuthRevoked { .. }) => {
                ConnectorErrorType::OauthTokenRevoked
            }
            SyncError::Client(ClientError::RateLimited { .. }) => {
                ConnectorErrorType::ThirdPartyRateLimited
            }
            SyncError::Client(ClientError::Transient { .. })
            | SyncError::Client(ClientError::Malformed { .. }) => {
                ConnectorErrorType::ThirdPartyInternalError
            }
            SyncError::Client(ClientError::Permanent { .. }) => {
                ConnectorErrorType::ThirdPartyPermissionDenied
            }
            SyncError::Cancelled(_) => ConnectorErrorType::Cancelled,
            _ => ConnectorErrorType::InternalError,
        }
    }
}

/// Typed failure returned to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityFailure {
    #[error("rate limited (retry after {retry_after_secs:?}s): {message}")]
    RateLimited {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
        message: String,
    },
    #[error("transient failure: {message}")]
    Transient { message: String },
    #[error("access revoked: {message}")]
    AuthRevoked { message: String },
    #[error("cancelled: {message}")]
    Cancelled { message: String },
    #[error("permanent failure: {message}")]
    Permanent { message: String },
}

impl ActivityFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActivityFailure::RateLimited { .. } | ActivityFailure::Transient { .. }
        )
    }

    /// Error kind recorded on the connector when this failure ends a sync.
    pub fn connector_error_type(&self) -> ConnectorErrorType {
        match self {
            ActivityFailure::RateLimited { .. } => ConnectorErrorType::ThirdPartyRateLimited,
            ActivityFailure::Transient { .. } => ConnectorErrorType::ThirdPartyInternalError,
            ActivityFailure::AuthRevoked { .. } => ConnectorErrorType::OauthTokenRevoked,
            ActivityFailure::Cancelled { .. } => ConnectorErrorType::Cancelled,
            ActivityFailure::Permanent { .. } => ConnectorErrorType::InternalError,
        }
    }
}

impl From<&SyncError> for ActivityFailure {
    fn from(err: &SyncError) -> Self {
        let message = err.to_string();
        if err.is_auth_revoked() {
            return ActivityFailure::AuthRevoked { message };
        }
        if err.is_rate_limited() {
            return ActivityFailure::RateLimited {
                retry_after_secs: err.retry_after_secs(),
                message,
            };
        }
        match err {
            SyncError::Cancelled(_) => ActivityFailure::Cancelled { message },
            err if err.is_retryable() => ActivityFailure::Transient { message },
            _ => ActivityFailure::Permanent { message },
        }
    }
}

impl From<SyncError> for ActivityFailure {
    fn from(err: SyncError) -> Self {
        ActivityFailure::from(&err)
    }
}
