//! Cascading deletion.
//!
//! Document store entries go first and rows second: a row is only removed once
//! every entry it accounts for is confirmed gone, so a crash in between leaves
//! rows that the next pass deletes again.

use std::collections::HashSet;

use metrics::counter;
use tracing::{debug, info};

use super::{ReconciliationEngine, SyncContext};
use crate::error::SyncError;
use crate::executor;
use crate::ids::{internal_id, section_id};
use crate::models::{container, leaf_document, sync_scope};
use crate::provider::NodeKind;

impl ReconciliationEngine {
    /// Deletes the documents of `rows`, then the rows themselves.
    pub async fn delete_leaves(
        &self,
        ctx: &SyncContext,
        rows: &[leaf_document::Model],
    ) -> Result<usize, SyncError> {
        if rows.is_empty() {
            return Ok(0);
        }
        ctx.ensure_active()?;

        let results = executor::run(
            rows.iter(),
            |row| async move {
                self.documents
                    .delete_document(ctx.data_source_id(), &row.document_id)
                    .await
            },
            ctx.concurrency,
        )
        .await;
        let (_, failed) = executor::partition(results);
        if let Some(err) = failed.into_iter().next() {
            return Err(err.into());
        }

        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        self.store.leaves.destroy_ids(&ids).await?;
        counter!("sync_documents_deleted_total", "provider" => ctx.provider.as_str())
            .increment(rows.len() as u64);
        debug!(connector_id = %ctx.connector_id(), count = rows.len(), "Deleted leaves");
        Ok(rows.len())
    }

    /// Deletes a container together with nested containers and their leaves.
    pub async fn delete_container_subtree(
        &self,
        ctx: &SyncContext,
        root: &container::Model,
    ) -> Result<(), SyncError> {
        let connector_id = ctx.connector_id();
        let scope = root.scope_external_id.as_str();

        let mut subtree = vec![root.clone()];
        let mut visited = HashSet::from([root.external_id.clone()]);
        let mut next = 0;
        while next < subtree.len() {
            let parent = subtree[next].external_id.clone();
            next += 1;
            for child in self
                .store
                .containers
                .find_children(connector_id, scope, &parent)
                .await?
            {
                if visited.insert(child.external_id.clone()) {
                    subtree.push(child);
                }
            }
        }

        for node in &subtree {
            let leaves = self
                .store
                .leaves
                .find_by_container(connector_id, scope, &node.external_id)
                .await?;
            self.delete_leaves(ctx, &leaves).await?;
        }

        // Deepest first, so an interrupted delete never orphans a child folder.
        for node in subtree.iter().rev() {
            ctx.ensure_active()?;
            let kind: NodeKind = node.kind.parse()?;
            self.documents
                .delete_folder(
                    ctx.data_source_id(),
                    &internal_id(kind, connector_id, &node.external_id),
                )
                .await?;
        }
        let ids: Vec<_> = subtree.iter().map(|c| c.id).collect();
        self.store.containers.destroy_ids(&ids).await?;
        info!(
            connector_id = %connector_id,
            container = %root.external_id,
            containers = subtree.len(),
            "Deleted container subtree"
        );
        Ok(())
    }

    /// Deletes a scope and everything below it.
    pub async fn delete_scope(
        &self,
        ctx: &SyncContext,
        scope: &sync_scope::Model,
    ) -> Result<(), SyncError> {
        let connector_id = ctx.connector_id();
        let kind: NodeKind = scope.kind.parse()?;
        let leaf_kinds = NodeKind::leaf_kinds(ctx.provider);

        let leaves = self
            .store
            .leaves
            .find_by_scope(connector_id, &scope.external_id, &leaf_kinds)
            .await?;
        self.delete_leaves(ctx, &leaves).await?;

        let containers = self
            .store
            .containers
            .find_by_scope(connector_id, &scope.external_id)
            .await?;
        for row in &containers {
            ctx.ensure_active()?;
            let container_kind: NodeKind = row.kind.parse()?;
            self.documents
                .delete_folder(
                    ctx.data_source_id(),
                    &internal_id(container_kind, connector_id, &row.external_id),
                )
                .await?;
        }
        let ids: Vec<_> = containers.iter().map(|c| c.id).collect();
        self.store.containers.destroy_ids(&ids).await?;

        for section in kind.sections() {
            self.documents
                .delete_folder(
                    ctx.data_source_id(),
                    &section_id(*section, connector_id, &scope.external_id),
                )
                .await?;
        }
        self.documents
            .delete_folder(
                ctx.data_source_id(),
                &internal_id(kind, connector_id, &scope.external_id),
            )
            .await?;
        self.store
            .scopes
            .destroy(connector_id, &scope.external_id)
            .await?;
        counter!("sync_scopes_deleted_total", "provider" => ctx.provider.as_str()).increment(1);
        info!(
            connector_id = %connector_id,
            scope = %scope.external_id,
            leaves = leaves.len(),
            containers = containers.len(),
            "Deleted scope"
        );
        Ok(())
    }

    /// Cleans up a revoked section and clears its grant.
    ///
    /// Only leaves that hang directly off the section go with it. Containers
    /// below the section keep living on their own grants.
    pub(super) async fn revoke_section(
        &self,
        ctx: &SyncContext,
        scope: &sync_scope::Model,
        section: NodeKind,
    ) -> Result<sync_scope::Model, SyncError> {
        let connector_id = ctx.connector_id();
        let direct_kinds: Vec<NodeKind> = NodeKind::leaf_kinds(ctx.provider)
            .into_iter()
            .filter(|k| k.section() == Some(section) && k.parent_container_kind().is_none())
            .collect();

        let leaves = self
            .store
            .leaves
            .find_by_scope(connector_id, &scope.external_id, &direct_kinds)
            .await?;
        self.delete_leaves(ctx, &leaves).await?;

        self.documents
            .delete_folder(
                ctx.data_source_id(),
                &section_id(section, connector_id, &scope.external_id),
            )
            .await?;
        let updated = self
            .store
            .scopes
            .set_section_permission(scope.id, section, None)
            .await?;
        info!(
            connector_id = %connector_id,
            scope = %scope.external_id,
            section = %section,
            leaves = leaves.len(),
            "Revoked section cleaned up"
        );
        Ok(updated)
    }
}
