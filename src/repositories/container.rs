//! Container repository
//!
//! Containers are keyed by `(connector_id, kind, external_id)`. Besides plain
//! CRUD this exposes the bulk and cursor queries used by subtree deletion and
//! garbage collection.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{StoreError, first_of_unique};
use crate::models::container::{self, Entity as Container};
use crate::models::leaf_document::{self, Entity as LeafDocument};
use crate::provider::{NodeKind, Permission};

#[derive(Debug, Clone)]
pub struct NewContainer {
    pub connector_id: Uuid,
    pub scope_external_id: String,
    pub kind: NodeKind,
    pub external_id: String,
    pub parent_external_id: Option<String>,
    pub permission: Permission,
}

#[derive(Debug, Clone)]
pub struct ContainerRepository {
    db: Arc<DatabaseConnection>,
}

impl ContainerRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_one(
        &self,
        connector_id: Uuid,
        kind: NodeKind,
        external_id: &str,
    ) -> Result<Option<container::Model>, StoreError> {
        let rows = Container::find()
            .filter(container::Column::ConnectorId.eq(connector_id))
            .filter(container::Column::Kind.eq(kind.as_str()))
            .filter(container::Column::ExternalId.eq(external_id))
            .order_by_asc(container::Column::CreatedAt)
            .order_by_asc(container::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(first_of_unique(rows, "containers", connector_id, external_id))
    }

    pub async fn find_by_scope(
        &self,
        connector_id: Uuid,
        scope_external_id: &str,
    ) -> Result<Vec<container::Model>, StoreError> {
        Ok(Container::find()
            .filter(container::Column::ConnectorId.eq(connector_id))
            .filter(container::Column::ScopeExternalId.eq(scope_external_id))
            .order_by_asc(container::Column::ExternalId)
            .all(&*self.db)
            .await?)
    }

    /// Direct children of a container.
    pub async fn find_children(
        &self,
        connector_id: Uuid,
        scope_external_id: &str,
        parent_external_id: &str,
    ) -> Result<Vec<container::Model>, StoreError> {
        Ok(Container::find()
            .filter(container::Column::ConnectorId.eq(connector_id))
            .filter(container::Column::ScopeExternalId.eq(scope_external_id))
            .filter(container::Column::ParentExternalId.eq(parent_external_id))
            .order_by_asc(container::Column::ExternalId)
            .all(&*self.db)
            .await?)
    }

    /// Whether any container of `kind` under the scope still grants read access.
    pub async fn any_readable(
        &self,
        connector_id: Uuid,
        scope_external_id: &str,
        kind: NodeKind,
    ) -> Result<bool, StoreError> {
        let count = Container::find()
            .filter(container::Column::ConnectorId.eq(connector_id))
            .filter(container::Column::ScopeExternalId.eq(scope_external_id))
            .filter(container::Column::Kind.eq(kind.as_str()))
            .filter(container::Column::Permission.is_in([
                Permission::Read.as_str(),
                Permission::ReadWrite.as_str(),
            ]))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn create(&self, new: NewContainer) -> Result<container::Model, StoreError> {
        let now = Utc::now().into();
        let model = container::ActiveModel {
            id: Set(Uuid::new_v4()),
            connector_id: Set(new.connector_id),
            scope_external_id: Set(new.scope_external_id),
            kind: Set(new.kind.as_str().to_string()),
            external_id: Set(new.external_id),
            parent_external_id: Set(new.parent_external_id),
            permission: Set(new.permission.as_str().to_string()),
            name: Set(None),
            description: Set(None),
            url: Set(None),
            last_upserted_ts: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }

    pub async fn set_permission(
        &self,
        id: Uuid,
        permission: Permission,
    ) -> Result<container::Model, StoreError> {
        let model = container::ActiveModel {
            id: Set(id),
            permission: Set(permission.as_str().to_string()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        Ok(model.update(&*self.db).await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_display(
        &self,
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
        url: Option<String>,
        parent_external_id: Option<String>,
        last_upserted_ts: DateTime<Utc>,
    ) -> Result<container::Model, StoreError> {
        let model = container::ActiveModel {
            id: Set(id),
            name: Set(name),
            description: Set(description),
            url: Set(url),
            parent_external_id: Set(parent_external_id),
            last_upserted_ts: Set(Some(last_upserted_ts.into())),
            updated_at: Set(last_upserted_ts.into()),
            ..Default::default()
        };
        Ok(model.update(&*self.db).await?)
    }

    pub async fn destroy(
        &self,
        connector_id: Uuid,
        kind: NodeKind,
        external_id: &str,
    ) -> Result<u64, StoreError> {
        let result = Container::delete_many()
            .filter(container::Column::ConnectorId.eq(connector_id))
            .filter(container::Column::Kind.eq(kind.as_str()))
            .filter(container::Column::ExternalId.eq(external_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Bulk delete by primary key.
    pub async fn destroy_ids(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = Container::delete_many()
            .filter(container::Column::Id.is_in(ids.iter().copied()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Up to `limit` containers of the scope ordered by external id, strictly
    /// after `after`. With `permission` set only rows carrying that grant match.
    pub async fn fetch_past_cursor(
        &self,
        connector_id: Uuid,
        scope_external_id: &str,
        permission: Option<Permission>,
        after: Option<&str>,
        limit: u64,
    ) -> Result<Vec<container::Model>, StoreError> {
        let mut query = Container::find()
            .filter(container::Column::ConnectorId.eq(connector_id))
            .filter(container::Column::ScopeExternalId.eq(scope_external_id));
        if let Some(permission) = permission {
            query = query.filter(container::Column::Permission.eq(permission.as_str()));
        }
        if let Some(after) = after {
            query = query.filter(container::Column::ExternalId.gt(after));
        }
        Ok(query
            .order_by_asc(container::Column::ExternalId)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    /// Whether the container has neither nested containers nor leaves.
    pub async fn is_empty(&self, row: &container::Model) -> Result<bool, StoreError> {
        let nested = Container::find()
            .filter(container::Column::ConnectorId.eq(row.connector_id))
            .filter(container::Column::ScopeExternalId.eq(row.scope_external_id.as_str()))
            .filter(container::Column::ParentExternalId.eq(row.external_id.as_str()))
            .count(&*self.db)
            .await?;
        if nested > 0 {
            return Ok(false);
        }
        let leaves = LeafDocument::find()
            .filter(
                Condition::all()
                    .add(leaf_document::Column::ConnectorId.eq(row.connector_id))
                    .add(
                        leaf_document::Column::ScopeExternalId.eq(row.scope_external_id.as_str()),
                    )
                    .add(leaf_document::Column::ContainerExternalId.eq(row.external_id.as_str())),
            )
            .count(&*self.db)
            .await?;
        Ok(leaves == 0)
    }
}
