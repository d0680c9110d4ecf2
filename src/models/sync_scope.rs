//! Sync scope entity model
//!
//! Top-level provider unit (Zendesk brand, Intercom help center, GitHub repo,
//! Slack or Notion workspace) together with its permission grants.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

use crate::provider::{NodeKind, Permission};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_scopes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning connector
    pub connector_id: Uuid,

    /// Node kind slug (`zendesk_brand`, ...)
    pub kind: String,

    /// Provider identifier of the scope
    pub external_id: String,

    /// Grant on the scope as a whole (`none|read|read_write`)
    pub permission: String,

    /// Grant on the help-center section, for scopes split into sections
    pub help_center_permission: Option<String>,

    /// Grant on the tickets section, for scopes split into sections
    pub tickets_permission: Option<String>,

    /// Cached display name
    pub name: Option<String>,

    /// Cached upstream URL
    pub url: Option<String>,

    /// Cached description
    pub description: Option<String>,

    /// Last time a reconciliation pass completed for this scope
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
    /// Parsed node kind; unknown values are reported by the caller.
    pub fn node_kind(&self) -> Option<NodeKind> {
        self.kind.parse().ok()
    }

    /// Grant on the scope itself. Unparseable values read as `none`.
    pub fn scope_permission(&self) -> Permission {
        self.permission.parse().unwrap_or(Permission::None)
    }

    pub fn help_center_permission(&self) -> Option<Permission> {
        self.help_center_permission
            .as_deref()
            .map(|p| p.parse().unwrap_or(Permission::None))
    }

    pub fn tickets_permission(&self) -> Option<Permission> {
        self.tickets_permission
            .as_deref()
            .map(|p| p.parse().unwrap_or(Permission::None))
    }

    /// Whether the scope kind splits into independently grantable sections.
    ///
    /// A null section column means "not granted"; `none` means revoked with
    /// cleanup still pending.
    pub fn has_sections(&self) -> bool {
        self.node_kind()
            .is_some_and(|kind| !kind.sections().is_empty())
    }

    /// Raw grant of one section, `None` when the column is null.
    pub fn section_permission(&self, section: NodeKind) -> Option<Permission> {
        match section {
            NodeKind::ZendeskHelpCenter => self.help_center_permission(),
            NodeKind::ZendeskTickets => self.tickets_permission(),
            _ => None,
        }
    }

    /// Strongest grant across the scope and its sections.
    pub fn effective_permission(&self) -> Permission {
        if self.has_sections() {
            self.help_center_permission()
                .into_iter()
                .chain(self.tickets_permission())
                .max()
                .unwrap_or(Permission::None)
        } else {
            self.scope_permission()
        }
    }

    /// Grant that applies to nodes of `kind` below this scope.
    pub fn permission_for(&self, kind: NodeKind) -> Permission {
        match kind.section() {
            Some(NodeKind::ZendeskHelpCenter) if self.has_sections() => {
                self.help_center_permission().unwrap_or(Permission::None)
            }
            Some(NodeKind::ZendeskTickets) if self.has_sections() => {
                self.tickets_permission().unwrap_or(Permission::None)
            }
            _ => self.scope_permission(),
        }
    }
}
