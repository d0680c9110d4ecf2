//! Leaf document entity model
//!
//! Local mirror of one document store entry.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::provider::NodeKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "leaf_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub connector_id: Uuid,

    /// External id of the owning scope
    pub scope_external_id: String,

    /// External id of the parent container; null for container-less leaves
    pub container_external_id: Option<String>,

    pub kind: String,

    pub external_id: String,

    pub title: Option<String>,

    /// Upstream lifecycle state (`published`, `solved`, `open`, ...)
    pub state: Option<String>,

    /// Internal document id in the document store
    pub document_id: String,

    /// Internal ids from the document itself up to the scope root
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub parents: Option<JsonValue>,

    pub source_url: Option<String>,

    /// Upstream modification time seen on the last reconciliation
    pub upstream_updated_at: Option<DateTimeWithTimeZone>,

    /// Sync time of the last successful document store upsert
    pub last_upserted_ts: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::connector::Entity",
        from = "Column::ConnectorId",
        to = "super::connector::Column::Id"
    )]
    Connector,
}

impl Related<super::connector::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connector.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn node_kind(&self) -> Option<NodeKind> {
        self.kind.parse().ok()
    }

    /// Stored parent chain, empty when missing or malformed.
    pub fn parent_ids(&self) -> Vec<String> {
        self.parents
            .as_ref()
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .unwrap_or_default()
    }
}
