//! Connector entity model
//!
//! One row per workspace connection to a provider. Every scope, container and
//! leaf row is owned by exactly one connector.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::provider::{ParseKindError, ProviderKind};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connectors")]
pub struct Model {
    /// Unique identifier for the connector (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Provider slug (`slack`, `zendesk`, ...)
    pub provider: String,

    /// Reference handed to the credential source to obtain access tokens
    pub connection_id: String,

    /// Workspace owning the connector
    pub workspace_id: String,

    /// Document store namespace receiving this connector's documents
    pub data_source_id: String,

    /// Provider-specific settings (e.g. Zendesk `subdomain`)
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<JsonValue>,

    /// Ticket retention window overriding the configured default
    pub ticket_retention_days: Option<i32>,

    /// Whether sync is enabled for this connector
    pub enabled: bool,

    /// `succeeded` or `failed` once a sync has finished
    pub last_sync_status: Option<String>,

    pub last_sync_start_time: Option<DateTimeWithTimeZone>,

    pub last_sync_finish_time: Option<DateTimeWithTimeZone>,

    pub last_sync_successful_time: Option<DateTimeWithTimeZone>,

    pub first_successful_sync_time: Option<DateTimeWithTimeZone>,

    /// Human-readable progress of the first full sync
    pub first_sync_progress: Option<String>,

    /// Error kind of the last failed sync (`oauth_token_revoked`, ...)
    pub error_type: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_scope::Entity")]
    SyncScope,
}

impl Related<super::sync_scope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncScope.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn provider_kind(&self) -> Result<ProviderKind, ParseKindError> {
        self.provider.parse()
    }

    /// Reads a string setting from the connector metadata.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }
}
