//! # Reconciliation Engine
//!
//! Diffs upstream truth against the local mirror and applies the result to the
//! document store and the state store. Each entry point handles exactly one
//! node; the engine never recurses on its own. Callers walk the tree through
//! [`crate::walker`] and schedule one call per node or page.
//!
//! Every step re-reads the rows it needs, so a unit of work can be replayed
//! after a crash at any point and still converge.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConcurrencyConfig;
use crate::connectors::{
    ConnectionRef, ProviderClient, ProviderClients, RemoteResource, ResourceRef,
};
use crate::documents::{DocumentStore, FOLDER_MIME_TYPE, FolderUpsert};
use crate::error::SyncError;
use crate::executor;
use crate::ids::{internal_id, section_id};
use crate::models::{connector, container, leaf_document, sync_scope};
use crate::provider::{NodeKind, NodeLevel, Permission, ProviderKind};
use crate::repositories::{LeafUpsert, NewContainer, ScopeDisplay, StateStore};
use crate::walker::{MAX_CHAIN_DEPTH, TreeWalker};

mod cascade;
pub mod policy;
pub mod render;

use policy::{Indexability, ScopeDecision};

/// Everything one sync pass of one connector needs.
pub struct SyncContext {
    pub connector: connector::Model,
    pub provider: ProviderKind,
    pub conn: ConnectionRef,
    pub client: Arc<dyn ProviderClient>,
    pub cancel: CancellationToken,
    pub force_resync: bool,
    /// Start of the pass; stamped into `last_upserted_ts`.
    pub sync_time: DateTime<Utc>,
    pub concurrency: usize,
}

impl SyncContext {
    pub fn connector_id(&self) -> Uuid {
        self.connector.id
    }

    pub fn data_source_id(&self) -> &str {
        &self.connector.data_source_id
    }

    /// Fails with [`SyncError::Cancelled`] once the connector was cancelled.
    pub fn ensure_active(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled(self.connector.id));
        }
        Ok(())
    }
}

/// Result of reconciling one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Neither tracked nor wanted.
    Noop,
    /// Node and descendants removed.
    Deleted,
    /// Part of the node was revoked; the rest is kept.
    Downgraded,
    /// Display fields or folder refreshed.
    Updated,
    /// Leaf content sent to the document store.
    Upserted,
    /// Already current.
    Skipped,
    /// Leaf tracked but has no content to index.
    SkippedEmpty,
}

impl Outcome {
    /// Whether the node still exists locally after reconciliation.
    pub fn is_alive(&self) -> bool {
        !matches!(self, Outcome::Noop | Outcome::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Noop => "noop",
            Outcome::Deleted => "deleted",
            Outcome::Downgraded => "downgraded",
            Outcome::Updated => "updated",
            Outcome::Upserted => "upserted",
            Outcome::Skipped => "skipped",
            Outcome::SkippedEmpty => "skipped_empty",
        }
    }
}

/// Per-outcome counts of a leaf page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafBatchReport {
    pub upserted: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub noop: usize,
    pub failed: usize,
}

impl LeafBatchReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Upserted => self.upserted += 1,
            Outcome::Skipped | Outcome::SkippedEmpty => self.skipped += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Noop | Outcome::Downgraded | Outcome::Updated => self.noop += 1,
        }
    }
}

fn section_title(section: NodeKind) -> &'static str {
    match section {
        NodeKind::ZendeskHelpCenter => "Help Center",
        NodeKind::ZendeskTickets => "Tickets",
        _ => "Section",
    }
}

fn skipped(provider: ProviderKind, reason: &'static str) {
    counter!(
        "sync_upserts_skipped_total",
        "provider" => provider.as_str(),
        "reason" => reason
    )
    .increment(1);
}

fn as_utc(ts: Option<sea_orm::prelude::DateTimeWithTimeZone>) -> Option<DateTime<Utc>> {
    ts.map(|t| t.with_timezone(&Utc))
}

/// Whether a row was modified (e.g. a grant changed) after its last pass.
fn modified_since_last_pass(
    last_upserted_ts: Option<sea_orm::prelude::DateTimeWithTimeZone>,
    updated_at: sea_orm::prelude::DateTimeWithTimeZone,
) -> bool {
    match last_upserted_ts {
        None => true,
        Some(last) => updated_at > last,
    }
}

pub struct ReconciliationEngine {
    store: StateStore,
    documents: Arc<dyn DocumentStore>,
    clients: ProviderClients,
    walker: TreeWalker,
    concurrency: ConcurrencyConfig,
}

impl ReconciliationEngine {
    pub fn new(
        store: StateStore,
        documents: Arc<dyn DocumentStore>,
        clients: ProviderClients,
        concurrency: ConcurrencyConfig,
    ) -> Self {
        Self {
            walker: TreeWalker::new(store.clone()),
            store,
            documents,
            clients,
            concurrency,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn walker(&self) -> &TreeWalker {
        &self.walker
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Loads the connector and resolves its provider client.
    pub async fn context(
        &self,
        connector_id: Uuid,
        cancel: CancellationToken,
        force_resync: bool,
        sync_time: DateTime<Utc>,
    ) -> Result<SyncContext, SyncError> {
        let connector = self.store.connectors.get(connector_id).await?;
        let provider = connector.provider_kind()?;
        let client = self.clients.get(provider)?;
        Ok(SyncContext {
            conn: ConnectionRef::from(&connector),
            concurrency: self.concurrency.for_provider(provider),
            connector,
            provider,
            client,
            cancel,
            force_resync,
            sync_time,
        })
    }

    /// Reconciles a scope row (brand, help center, repo, workspace).
    ///
    /// Untracked scopes are left alone. Revoked or vanished scopes are deleted
    /// with everything below them; sectioned scopes may instead lose only the
    /// revoked sections.
    pub async fn reconcile_scope(
        &self,
        ctx: &SyncContext,
        scope_external_id: &str,
    ) -> Result<Outcome, SyncError> {
        let connector_id = ctx.connector_id();
        let Some(scope) = self
            .store
            .scopes
            .find_one(connector_id, scope_external_id)
            .await?
        else {
            debug!(connector_id = %connector_id, scope = scope_external_id, "Scope not tracked");
            return Ok(Outcome::Noop);
        };
        let kind: NodeKind = scope.kind.parse()?;

        let container_kind = kind
            .child_kinds()
            .iter()
            .copied()
            .find(|k| k.level() == NodeLevel::Container);
        let readable_containers = match container_kind {
            Some(container_kind) => {
                self.store
                    .containers
                    .any_readable(connector_id, scope_external_id, container_kind)
                    .await?
            }
            None => false,
        };

        let revoked_sections = match policy::decide_scope(kind, &scope, readable_containers) {
            ScopeDecision::Delete => {
                info!(
                    connector_id = %connector_id,
                    provider = %ctx.provider,
                    scope = scope_external_id,
                    "Scope no longer granted, deleting"
                );
                self.delete_scope(ctx, &scope).await?;
                return Ok(Outcome::Deleted);
            }
            ScopeDecision::Keep { revoked_sections } => revoked_sections,
        };

        let node = ResourceRef::scope(kind, scope_external_id);
        let Some(remote) = ctx.client.get_one(&ctx.conn, &node).await? else {
            info!(
                connector_id = %connector_id,
                provider = %ctx.provider,
                scope = scope_external_id,
                "Scope gone upstream, deleting"
            );
            self.delete_scope(ctx, &scope).await?;
            return Ok(Outcome::Deleted);
        };

        let downgraded = !revoked_sections.is_empty();
        let mut scope = scope;
        for section in revoked_sections {
            scope = self.revoke_section(ctx, &scope, section).await?;
        }

        let published = self.publish_scope(ctx, kind, &scope, &remote).await?;
        Ok(if downgraded {
            Outcome::Downgraded
        } else if published {
            Outcome::Updated
        } else {
            Outcome::Skipped
        })
    }

    /// Reconciles a container. `grant` creates the row when it does not exist
    /// yet; `discovered` is the listing entry, used instead of a fetch.
    pub async fn reconcile_container(
        &self,
        ctx: &SyncContext,
        node: &ResourceRef,
        grant: Option<Permission>,
        discovered: Option<RemoteResource>,
    ) -> Result<Outcome, SyncError> {
        let connector_id = ctx.connector_id();
        let row = match self
            .store
            .containers
            .find_one(connector_id, node.kind, &node.external_id)
            .await?
        {
            Some(row) => row,
            None => match grant {
                Some(permission) if permission.is_readable() => {
                    let parent_external_id = discovered
                        .as_ref()
                        .and_then(|d| d.parent_external_id.clone());
                    let depth = match &parent_external_id {
                        Some(parent) => {
                            1 + self.container_depth(connector_id, node.kind, parent).await?
                        }
                        None => 1,
                    };
                    if depth > node.kind.max_depth() {
                        warn!(
                            connector_id = %connector_id,
                            kind = %node.kind,
                            external_id = %node.external_id,
                            depth,
                            max_depth = node.kind.max_depth(),
                            "Container nested too deep, skipping"
                        );
                        return Ok(Outcome::Noop);
                    }
                    self.store
                        .containers
                        .create(NewContainer {
                            connector_id,
                            scope_external_id: node.scope_external_id.clone(),
                            kind: node.kind,
                            external_id: node.external_id.clone(),
                            parent_external_id,
                            permission,
                        })
                        .await?
                }
                _ => return Ok(Outcome::Noop),
            },
        };

        if !row.permission().is_readable() {
            info!(
                connector_id = %connector_id,
                kind = %node.kind,
                external_id = %node.external_id,
                "Container revoked, deleting subtree"
            );
            self.delete_container_subtree(ctx, &row).await?;
            return Ok(Outcome::Deleted);
        }

        let remote = match discovered {
            Some(remote) => Some(remote),
            None => ctx.client.get_one(&ctx.conn, node).await?,
        };
        let Some(remote) = remote else {
            info!(
                connector_id = %connector_id,
                kind = %node.kind,
                external_id = %node.external_id,
                "Container gone upstream, deleting subtree"
            );
            self.delete_container_subtree(ctx, &row).await?;
            return Ok(Outcome::Deleted);
        };

        if self.publish_container(ctx, node, &row, &remote).await? {
            Ok(Outcome::Updated)
        } else {
            Ok(Outcome::Skipped)
        }
    }

    /// Number of tracked `kind` containers from `external_id` up to the
    /// top of its chain, the container itself included.
    pub async fn container_depth(
        &self,
        connector_id: Uuid,
        kind: NodeKind,
        external_id: &str,
    ) -> Result<usize, SyncError> {
        let mut depth = 0;
        let mut current = Some(external_id.to_string());
        while let Some(id) = current.take() {
            if depth >= MAX_CHAIN_DEPTH {
                break;
            }
            let Some(row) = self.store.containers.find_one(connector_id, kind, &id).await? else {
                break;
            };
            depth += 1;
            current = row.parent_external_id;
        }
        Ok(depth)
    }

    /// Reconciles one leaf and syncs its content when stale.
    pub async fn reconcile_leaf(
        &self,
        ctx: &SyncContext,
        node: &ResourceRef,
        discovered: Option<RemoteResource>,
    ) -> Result<Outcome, SyncError> {
        let connector_id = ctx.connector_id();
        let row = self
            .store
            .leaves
            .find_one(connector_id, node.kind, &node.external_id)
            .await?;
        let container_external_id = match &discovered {
            Some(found) => found.parent_external_id.clone(),
            None => row.as_ref().and_then(|r| r.container_external_id.clone()),
        };

        if !self
            .leaf_wanted(ctx, node, container_external_id.as_deref())
            .await?
        {
            return self.drop_leaf(ctx, row).await;
        }

        let remote = match discovered {
            Some(remote) => Some(remote),
            None => ctx.client.get_one(&ctx.conn, node).await?,
        };
        let Some(mut remote) = remote else {
            return self.drop_leaf(ctx, row).await;
        };

        match policy::indexability(node.kind, remote.state.as_deref()) {
            Indexability::Delete => return self.drop_leaf(ctx, row).await,
            Indexability::Skip => {
                skipped(ctx.provider, "state");
                return Ok(Outcome::Skipped);
            }
            Indexability::Index => {}
        }

        let last_upserted = row.as_ref().and_then(|r| as_utc(r.last_upserted_ts));
        if !policy::needs_upsert(ctx.force_resync, last_upserted, remote.updated_at) {
            skipped(ctx.provider, "current");
            return Ok(Outcome::Skipped);
        }

        // Listings may omit bodies; fetch the full resource only when uploading.
        if remote.body.is_none() {
            match ctx.client.get_one(&ctx.conn, node).await? {
                Some(full) => remote = full,
                None => return self.drop_leaf(ctx, row).await,
            }
        }

        let document_id = internal_id(node.kind, connector_id, &node.external_id);
        let chain = self
            .walker
            .parent_chain(connector_id, node, container_external_id.as_deref())
            .await?;
        let mut parents = Vec::with_capacity(chain.len() + 1);
        parents.push(document_id.clone());
        parents.extend(chain);

        let saved = self
            .store
            .leaves
            .upsert(LeafUpsert {
                connector_id,
                scope_external_id: node.scope_external_id.clone(),
                container_external_id,
                kind: node.kind,
                external_id: node.external_id.clone(),
                title: remote.title.clone(),
                state: remote.state.clone(),
                document_id: document_id.clone(),
                parents: parents.clone(),
                source_url: remote.url.clone(),
                upstream_updated_at: remote.updated_at,
            })
            .await?;

        let Some(document) = render::document(node.kind, &document_id, &remote, parents) else {
            debug!(
                connector_id = %connector_id,
                document_id = %document_id,
                "Leaf has no content, keeping the row only"
            );
            skipped(ctx.provider, "empty");
            return Ok(Outcome::SkippedEmpty);
        };

        self.documents
            .upsert_document(ctx.data_source_id(), document)
            .await?;
        self.store
            .leaves
            .mark_upserted(saved.id, ctx.sync_time)
            .await?;
        counter!("sync_documents_upserted_total", "provider" => ctx.provider.as_str()).increment(1);
        Ok(Outcome::Upserted)
    }

    /// Reconciles a page of discovered leaves with bounded fan-out.
    ///
    /// Siblings never block each other. Revocation and cancellation abort the
    /// page; a retryable failure is returned after every sibling ran, so a
    /// retry only redoes what is still stale. Other failures are counted.
    pub async fn reconcile_leaves(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        scope_external_id: &str,
        leaves: Vec<RemoteResource>,
    ) -> Result<LeafBatchReport, SyncError> {
        let results = executor::run(
            leaves,
            |item: RemoteResource| {
                let node = ResourceRef::new(kind, item.external_id.clone(), scope_external_id);
                async move { self.reconcile_leaf(ctx, &node, Some(item)).await }
            },
            ctx.concurrency,
        )
        .await;

        let mut report = LeafBatchReport::default();
        let mut retryable = None;
        for result in results {
            match result {
                Ok(outcome) => report.record(outcome),
                Err(err) if err.is_auth_revoked() || matches!(err, SyncError::Cancelled(_)) => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        connector_id = %ctx.connector_id(),
                        kind = %kind,
                        error = %err,
                        "Leaf reconciliation failed"
                    );
                    report.failed += 1;
                    if err.is_retryable() && retryable.is_none() {
                        retryable = Some(err);
                    }
                }
            }
        }
        match retryable {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn leaf_wanted(
        &self,
        ctx: &SyncContext,
        node: &ResourceRef,
        container_external_id: Option<&str>,
    ) -> Result<bool, SyncError> {
        let connector_id = ctx.connector_id();
        match node.kind.parent_container_kind() {
            Some(container_kind) => {
                let Some(container_external_id) = container_external_id else {
                    return Ok(false);
                };
                Ok(self
                    .store
                    .containers
                    .find_one(connector_id, container_kind, container_external_id)
                    .await?
                    .is_some_and(|c| c.permission().is_readable()))
            }
            None => Ok(self
                .store
                .scopes
                .find_one(connector_id, &node.scope_external_id)
                .await?
                .is_some_and(|s| s.permission_for(node.kind).is_readable())),
        }
    }

    async fn drop_leaf(
        &self,
        ctx: &SyncContext,
        row: Option<leaf_document::Model>,
    ) -> Result<Outcome, SyncError> {
        match row {
            Some(row) => {
                self.delete_leaves(ctx, std::slice::from_ref(&row)).await?;
                Ok(Outcome::Deleted)
            }
            None => Ok(Outcome::Noop),
        }
    }

    async fn publish_scope(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        scope: &sync_scope::Model,
        remote: &RemoteResource,
    ) -> Result<bool, SyncError> {
        let display = ScopeDisplay {
            name: remote.title.clone().or_else(|| scope.name.clone()),
            url: remote.url.clone().or_else(|| scope.url.clone()),
            description: remote.description.clone().or_else(|| scope.description.clone()),
        };
        let changed = display.name != scope.name
            || display.url != scope.url
            || display.description != scope.description;
        if !(ctx.force_resync
            || changed
            || modified_since_last_pass(scope.last_upserted_ts, scope.updated_at))
        {
            return Ok(false);
        }

        let connector_id = ctx.connector_id();
        let scope_id = internal_id(kind, connector_id, &scope.external_id);
        self.documents
            .upsert_folder(
                ctx.data_source_id(),
                FolderUpsert {
                    folder_id: scope_id.clone(),
                    title: display
                        .name
                        .clone()
                        .unwrap_or_else(|| scope.external_id.clone()),
                    parents: vec![scope_id.clone()],
                    parent_id: None,
                    mime_type: FOLDER_MIME_TYPE.to_string(),
                    source_url: display.url.clone(),
                },
            )
            .await?;

        for section in kind.sections() {
            if !scope
                .section_permission(*section)
                .is_some_and(|p| p.is_readable())
            {
                continue;
            }
            let folder_id = section_id(*section, connector_id, &scope.external_id);
            self.documents
                .upsert_folder(
                    ctx.data_source_id(),
                    FolderUpsert {
                        folder_id: folder_id.clone(),
                        title: section_title(*section).to_string(),
                        parents: vec![folder_id, scope_id.clone()],
                        parent_id: Some(scope_id.clone()),
                        mime_type: FOLDER_MIME_TYPE.to_string(),
                        source_url: None,
                    },
                )
                .await?;
        }

        self.store
            .scopes
            .update_display(scope.id, display, ctx.sync_time)
            .await?;
        Ok(true)
    }

    async fn publish_container(
        &self,
        ctx: &SyncContext,
        node: &ResourceRef,
        row: &container::Model,
        remote: &RemoteResource,
    ) -> Result<bool, SyncError> {
        let name = remote.title.clone().or_else(|| row.name.clone());
        let description = remote.description.clone().or_else(|| row.description.clone());
        let url = remote.url.clone().or_else(|| row.url.clone());
        let parent = match node.kind.parent_container_kind() {
            Some(_) => remote.parent_external_id.clone(),
            None => None,
        };
        let changed = name != row.name
            || description != row.description
            || url != row.url
            || parent != row.parent_external_id;
        if !(ctx.force_resync
            || changed
            || modified_since_last_pass(row.last_upserted_ts, row.updated_at))
        {
            return Ok(false);
        }

        let connector_id = ctx.connector_id();
        let folder_id = internal_id(node.kind, connector_id, &node.external_id);
        let chain = self
            .walker
            .parent_chain(connector_id, node, parent.as_deref())
            .await?;
        let parent_id = chain.first().cloned();
        let mut parents = Vec::with_capacity(chain.len() + 1);
        parents.push(folder_id.clone());
        parents.extend(chain);

        self.documents
            .upsert_folder(
                ctx.data_source_id(),
                FolderUpsert {
                    folder_id,
                    title: name.clone().unwrap_or_else(|| node.external_id.clone()),
                    parents,
                    parent_id,
                    mime_type: FOLDER_MIME_TYPE.to_string(),
                    source_url: url.clone(),
                },
            )
            .await?;
        self.store
            .containers
            .update_display(row.id, name, description, url, parent, ctx.sync_time)
            .await?;
        Ok(true)
    }
}
