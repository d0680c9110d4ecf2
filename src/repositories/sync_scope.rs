//! Sync scope repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{StoreError, first_of_unique};
use crate::models::sync_scope::{self, Entity as SyncScope};
use crate::provider::{NodeKind, Permission};

/// Grant recorded when a scope is first tracked.
#[derive(Debug, Clone)]
pub struct NewSyncScope {
    pub connector_id: Uuid,
    pub kind: NodeKind,
    pub external_id: String,
    pub permission: Permission,
    pub help_center_permission: Option<Permission>,
    pub tickets_permission: Option<Permission>,
}

/// Display fields refreshed from upstream on each pass.
#[derive(Debug, Clone, Default)]
pub struct ScopeDisplay {
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncScopeRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncScopeRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_one(
        &self,
        connector_id: Uuid,
        external_id: &str,
    ) -> Result<Option<sync_scope::Model>, StoreError> {
        let rows = SyncScope::find()
            .filter(sync_scope::Column::ConnectorId.eq(connector_id))
            .filter(sync_scope::Column::ExternalId.eq(external_id))
            .order_by_asc(sync_scope::Column::CreatedAt)
            .order_by_asc(sync_scope::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(first_of_unique(rows, "sync_scopes", connector_id, external_id))
    }

    pub async fn find_all(&self, connector_id: Uuid) -> Result<Vec<sync_scope::Model>, StoreError> {
        Ok(SyncScope::find()
            .filter(sync_scope::Column::ConnectorId.eq(connector_id))
            .order_by_asc(sync_scope::Column::ExternalId)
            .all(&*self.db)
            .await?)
    }

    pub async fn create(&self, new: NewSyncScope) -> Result<sync_scope::Model, StoreError> {
        let now = Utc::now().into();
        let model = sync_scope::ActiveModel {
            id: Set(Uuid::new_v4()),
            connector_id: Set(new.connector_id),
            kind: Set(new.kind.as_str().to_string()),
            external_id: Set(new.external_id),
            permission: Set(new.permission.as_str().to_string()),
            help_center_permission: Set(new.help_center_permission.map(|p| p.as_str().to_string())),
            tickets_permission: Set(new.tickets_permission.map(|p| p.as_str().to_string())),
            name: Set(None),
            url: Set(None),
            description: Set(None),
            last_upserted_ts: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Creates the scope, or overwrites the grants of an existing row.
    pub async fn upsert_grant(&self, new: NewSyncScope) -> Result<sync_scope::Model, StoreError> {
        match self.find_one(new.connector_id, &new.external_id).await? {
            Some(existing) => {
                let model = sync_scope::ActiveModel {
                    id: Set(existing.id),
                    permission: Set(new.permission.as_str().to_string()),
                    help_center_permission: Set(
                        new.help_center_permission.map(|p| p.as_str().to_string())
                    ),
                    tickets_permission: Set(new.tickets_permission.map(|p| p.as_str().to_string())),
                    updated_at: Set(Utc::now().into()),
                    ..Default::default()
                };
                Ok(model.update(&*self.db).await?)
            }
            None => self.create(new).await,
        }
    }

    pub async fn update_display(
        &self,
        id: Uuid,
        display: ScopeDisplay,
        last_upserted_ts: DateTime<Utc>,
    ) -> Result<sync_scope::Model, StoreError> {
        let model = sync_scope::ActiveModel {
            id: Set(id),
            name: Set(display.name),
            url: Set(display.url),
            description: Set(display.description),
            last_upserted_ts: Set(Some(last_upserted_ts.into())),
            // Grant changes made after this pass stamp a later updated_at.
            updated_at: Set(last_upserted_ts.into()),
            ..Default::default()
        };
        Ok(model.update(&*self.db).await?)
    }

    /// Sets or clears the grant of one section (`zendesk_help_center`,
    /// `zendesk_tickets`).
    pub async fn set_section_permission(
        &self,
        id: Uuid,
        section: NodeKind,
        permission: Option<Permission>,
    ) -> Result<sync_scope::Model, StoreError> {
        let value = permission.map(|p| p.as_str().to_string());
        let mut model = sync_scope::ActiveModel {
            id: Set(id),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        match section {
            NodeKind::ZendeskHelpCenter => model.help_center_permission = Set(value),
            NodeKind::ZendeskTickets => model.tickets_permission = Set(value),
            other => {
                return Err(StoreError::InvalidValue {
                    column: "section",
                    value: other.to_string(),
                });
            }
        }
        Ok(model.update(&*self.db).await?)
    }

    pub async fn set_permission(
        &self,
        id: Uuid,
        permission: Permission,
    ) -> Result<sync_scope::Model, StoreError> {
        let model = sync_scope::ActiveModel {
            id: Set(id),
            permission: Set(permission.as_str().to_string()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        Ok(model.update(&*self.db).await?)
    }

    /// Deletes every row for `(connector_id, external_id)`, duplicates included.
    pub async fn destroy(&self, connector_id: Uuid, external_id: &str) -> Result<u64, StoreError> {
        let result = SyncScope::delete_many()
            .filter(sync_scope::Column::ConnectorId.eq(connector_id))
            .filter(sync_scope::Column::ExternalId.eq(external_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
