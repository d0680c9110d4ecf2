//! Connector repository
//!
//! CRUD over the connectors table plus the last-sync bookkeeping columns.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use super::StoreError;
use crate::models::connector::{self, Entity as Connector};
use crate::provider::ProviderKind;

/// Fields required to register a connector.
#[derive(Debug, Clone)]
pub struct NewConnector {
    pub provider: ProviderKind,
    pub connection_id: String,
    pub workspace_id: String,
    pub data_source_id: String,
    pub metadata: Option<JsonValue>,
    pub ticket_retention_days: Option<i32>,
}

/// Repository for connector rows
#[derive(Debug, Clone)]
pub struct ConnectorRepository {
    db: Arc<DatabaseConnection>,
}

impl ConnectorRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewConnector) -> Result<connector::Model, StoreError> {
        let now = Utc::now().into();
        let model = connector::ActiveModel {
            id: Set(Uuid::new_v4()),
            provider: Set(new.provider.as_str().to_string()),
            connection_id: Set(new.connection_id),
            workspace_id: Set(new.workspace_id),
            data_source_id: Set(new.data_source_id),
            metadata: Set(new.metadata),
            ticket_retention_days: Set(new.ticket_retention_days),
            enabled: Set(true),
            last_sync_status: Set(None),
            last_sync_start_time: Set(None),
            last_sync_finish_time: Set(None),
            last_sync_successful_time: Set(None),
            first_successful_sync_time: Set(None),
            first_sync_progress: Set(None),
            error_type: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<connector::Model>, StoreError> {
        Ok(Connector::find_by_id(id).one(&*self.db).await?)
    }

    /// Like [`find_by_id`](Self::find_by_id) but a missing row is an error.
    pub async fn get(&self, id: Uuid) -> Result<connector::Model, StoreError> {
        self.find_by_id(id)
            .await?
            .ok_or(StoreError::ConnectorNotFound(id))
    }

    pub async fn list_enabled(&self) -> Result<Vec<connector::Model>, StoreError> {
        Ok(Connector::find()
            .filter(connector::Column::Enabled.eq(true))
            .order_by_asc(connector::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        connector::ActiveModel {
            id: Set(id),
            enabled: Set(enabled),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        }
        .update(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn record_sync_started(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.get(id).await?;
        connector::ActiveModel {
            id: Set(id),
            last_sync_start_time: Set(Some(started_at.into())),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        }
        .update(&*self.db)
        .await?;
        Ok(())
    }

    /// Records the outcome of a sync. A success clears the error kind and
    /// stamps the first successful sync time once.
    pub async fn record_sync_finished(
        &self,
        id: Uuid,
        status: &str,
        error_type: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<connector::Model, StoreError> {
        let current = self.get(id).await?;
        let finished = finished_at.into();

        let mut model = connector::ActiveModel {
            id: Set(id),
            last_sync_status: Set(Some(status.to_string())),
            last_sync_finish_time: Set(Some(finished)),
            error_type: Set(error_type.map(str::to_string)),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        if status == "succeeded" {
            model.last_sync_successful_time = Set(Some(finished));
            if current.first_successful_sync_time.is_none() {
                model.first_successful_sync_time = Set(Some(finished));
            }
        }
        Ok(model.update(&*self.db).await?)
    }

    pub async fn record_progress(&self, id: Uuid, progress: &str) -> Result<(), StoreError> {
        self.get(id).await?;
        connector::ActiveModel {
            id: Set(id),
            first_sync_progress: Set(Some(progress.to_string())),
            last_sync_successful_time: Set(None),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        }
        .update(&*self.db)
        .await?;
        Ok(())
    }

    /// Deletes the connector row. Child rows must already be gone.
    pub async fn delete(&self, id: Uuid) -> Result<u64, StoreError> {
        let result = Connector::delete_by_id(id).exec(&*self.db).await?;
        Ok(result.rows_affected)
    }
}
