//! Leaf document repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{StoreError, first_of_unique};
use crate::models::leaf_document::{self, Entity as LeafDocument};
use crate::provider::NodeKind;

/// Metadata written for a leaf on every reconciliation, before any content upsert.
#[derive(Debug, Clone)]
pub struct LeafUpsert {
    pub connector_id: Uuid,
    pub scope_external_id: String,
    pub container_external_id: Option<String>,
    pub kind: NodeKind,
    pub external_id: String,
    pub title: Option<String>,
    pub state: Option<String>,
    pub document_id: String,
    pub parents: Vec<String>,
    pub source_url: Option<String>,
    pub upstream_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct LeafDocumentRepository {
    db: Arc<DatabaseConnection>,
}

impl LeafDocumentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_one(
        &self,
        connector_id: Uuid,
        kind: NodeKind,
        external_id: &str,
    ) -> Result<Option<leaf_document::Model>, StoreError> {
        let rows = LeafDocument::find()
            .filter(leaf_document::Column::ConnectorId.eq(connector_id))
            .filter(leaf_document::Column::Kind.eq(kind.as_str()))
            .filter(leaf_document::Column::ExternalId.eq(external_id))
            .order_by_asc(leaf_document::Column::CreatedAt)
            .order_by_asc(leaf_document::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(first_of_unique(rows, "leaf_documents", connector_id, external_id))
    }

    pub async fn find_by_container(
        &self,
        connector_id: Uuid,
        scope_external_id: &str,
        container_external_id: &str,
    ) -> Result<Vec<leaf_document::Model>, StoreError> {
        Ok(LeafDocument::find()
            .filter(leaf_document::Column::ConnectorId.eq(connector_id))
            .filter(leaf_document::Column::ScopeExternalId.eq(scope_external_id))
            .filter(leaf_document::Column::ContainerExternalId.eq(container_external_id))
            .order_by_asc(leaf_document::Column::DocumentId)
            .all(&*self.db)
            .await?)
    }

    /// Leaves of the given kinds under a scope.
    pub async fn find_by_scope(
        &self,
        connector_id: Uuid,
        scope_external_id: &str,
        kinds: &[NodeKind],
    ) -> Result<Vec<leaf_document::Model>, StoreError> {
        Ok(LeafDocument::find()
            .filter(leaf_document::Column::ConnectorId.eq(connector_id))
            .filter(leaf_document::Column::ScopeExternalId.eq(scope_external_id))
            .filter(leaf_document::Column::Kind.is_in(kinds.iter().map(|k| k.as_str())))
            .order_by_asc(leaf_document::Column::DocumentId)
            .all(&*self.db)
            .await?)
    }

    /// Inserts the row or refreshes its metadata. `last_upserted_ts` is left alone.
    pub async fn upsert(&self, leaf: LeafUpsert) -> Result<leaf_document::Model, StoreError> {
        let parents = serde_json::to_value(&leaf.parents).map_err(|source| StoreError::Encode {
            column: "parents",
            source,
        })?;
        let now = Utc::now().into();

        match self
            .find_one(leaf.connector_id, leaf.kind, &leaf.external_id)
            .await?
        {
            Some(existing) => {
                let model = leaf_document::ActiveModel {
                    id: Set(existing.id),
                    scope_external_id: Set(leaf.scope_external_id),
                    container_external_id: Set(leaf.container_external_id),
                    title: Set(leaf.title),
                    state: Set(leaf.state),
                    document_id: Set(leaf.document_id),
                    parents: Set(Some(parents)),
                    source_url: Set(leaf.source_url),
                    upstream_updated_at: Set(leaf.upstream_updated_at.map(Into::into)),
                    updated_at: Set(now),
                    ..Default::default()
                };
                Ok(model.update(&*self.db).await?)
            }
            None => {
                let model = leaf_document::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    connector_id: Set(leaf.connector_id),
                    scope_external_id: Set(leaf.scope_external_id),
                    container_external_id: Set(leaf.container_external_id),
                    kind: Set(leaf.kind.as_str().to_string()),
                    external_id: Set(leaf.external_id),
                    title: Set(leaf.title),
                    state: Set(leaf.state),
                    document_id: Set(leaf.document_id),
                    parents: Set(Some(parents)),
                    source_url: Set(leaf.source_url),
                    upstream_updated_at: Set(leaf.upstream_updated_at.map(Into::into)),
                    last_upserted_ts: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                Ok(model.insert(&*self.db).await?)
            }
        }
    }

    /// Records a confirmed document store upsert at `synced_at`.
    pub async fn mark_upserted(
        &self,
        id: Uuid,
        synced_at: DateTime<Utc>,
    ) -> Result<leaf_document::Model, StoreError> {
        let model = leaf_document::ActiveModel {
            id: Set(id),
            last_upserted_ts: Set(Some(synced_at.into())),
            updated_at: Set(Utc::now().into()),
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
        let result = LeafDocument::delete_many()
            .filter(leaf_document::Column::ConnectorId.eq(connector_id))
            .filter(leaf_document::Column::Kind.eq(kind.as_str()))
            .filter(leaf_document::Column::ExternalId.eq(external_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Bulk delete by primary key.
    pub async fn destroy_ids(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = LeafDocument::delete_many()
            .filter(leaf_document::Column::Id.is_in(ids.iter().copied()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Leaves of a scope ordered by internal document id, strictly after `after`.
    ///
    /// The document id is unique per connector across kinds, which makes it a
    /// stable cursor key even when two kinds share an external id.
    pub async fn fetch_past_cursor(
        &self,
        connector_id: Uuid,
        scope_external_id: &str,
        after: Option<&str>,
        limit: u64,
    ) -> Result<Vec<leaf_document::Model>, StoreError> {
        let mut query = LeafDocument::find()
            .filter(leaf_document::Column::ConnectorId.eq(connector_id))
            .filter(leaf_document::Column::ScopeExternalId.eq(scope_external_id));
        if let Some(after) = after {
            query = query.filter(leaf_document::Column::DocumentId.gt(after));
        }
        Ok(query
            .order_by_asc(leaf_document::Column::DocumentId)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    /// Leaves of `kinds` whose upstream update is older than `cutoff`.
    pub async fn fetch_expired_past_cursor(
        &self,
        connector_id: Uuid,
        scope_external_id: &str,
        kinds: &[NodeKind],
        cutoff: DateTime<Utc>,
        after: Option<&str>,
        limit: u64,
    ) -> Result<Vec<leaf_document::Model>, StoreError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let cutoff: sea_orm::prelude::DateTimeWithTimeZone = cutoff.into();
        let mut query = LeafDocument::find()
            .filter(leaf_document::Column::ConnectorId.eq(connector_id))
            .filter(leaf_document::Column::ScopeExternalId.eq(scope_external_id))
            .filter(leaf_document::Column::Kind.is_in(kinds.iter().map(|k| k.as_str())))
            .filter(leaf_document::Column::UpstreamUpdatedAt.lt(cutoff));
        if let Some(after) = after {
            query = query.filter(leaf_document::Column::DocumentId.gt(after));
        }
        Ok(query
            .order_by_asc(leaf_document::Column::DocumentId)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }
}
