//! Container entity model
//!
//! Grouping node below a scope (Zendesk category, Intercom collection, Slack
//! channel, Notion database). `parent_external_id` is null when the container
//! hangs directly off the scope root.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

use crate::provider::{NodeKind, Permission};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "containers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub connector_id: Uuid,

    /// External id of the owning scope
    pub scope_external_id: String,

    pub kind: String,

    pub external_id: String,

    /// External id of the parent container, if nested
    pub parent_external_id: Option<String>,

    pub permission: String,

    pub name: Option<String>,

    pub description: Option<String>,

    pub url: Option<String>,

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

    pub fn permission(&self) -> Permission {
        self.permission.parse().unwrap_or(Permission::None)
    }
}
