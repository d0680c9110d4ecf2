//! # Activities
//!
//! Driver-facing units of work. Every activity takes plain identifiers,
//! returns a small serializable summary or an [`ActivityFailure`], and can be
//! retried as a whole. None of them keeps state between calls: rows are re-read
//! from the state store each time.
//!
//! An activity that sees the provider reject the connector's credentials
//! cancels every in-flight activity of that connector, records the failure on
//! the connector row and still returns the error.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::connectors::ResourceRef;
use crate::engine::policy;
use crate::engine::{LeafBatchReport, Outcome, ReconciliationEngine, SyncContext};
use crate::error::{ActivityFailure, SyncError};
use crate::gc::{GarbageCollector, GcBatch, GcCursor};
use crate::provider::{NodeKind, NodeLevel, Permission};
use crate::sync_status::{self, CancellationRegistry, ConnectorErrorType};
use crate::walker::WorkUnit;

/// Parameters shared by every activity of one sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub connector_id: Uuid,
    #[serde(default)]
    pub force_resync: bool,
    /// Start of the pass, identical for every activity of the pass.
    pub sync_time: DateTime<Utc>,
}

impl SyncRequest {
    pub fn new(connector_id: Uuid, force_resync: bool) -> Self {
        Self {
            connector_id,
            force_resync,
            sync_time: Utc::now(),
        }
    }
}

/// Summary of one reconciled work unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSummary {
    /// Outcome of the scope or container, absent for child pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Leaf counts of a child page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaves: Option<LeafBatchReport>,
    /// Units to schedule next.
    pub follow_ups: Vec<WorkUnit>,
}

/// Counts reported by [`Activities::cleanup_connector`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub scopes: usize,
    pub containers: usize,
    pub leaves: usize,
}

pub struct Activities {
    engine: Arc<ReconciliationEngine>,
    gc: GarbageCollector,
    cancellations: CancellationRegistry,
}

impl Activities {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        gc: GarbageCollector,
        cancellations: CancellationRegistry,
    ) -> Self {
        Self {
            engine,
            gc,
            cancellations,
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Marks the start of a sync and opens a fresh cancellation scope.
    #[instrument(skip(self), fields(connector_id = %request.connector_id))]
    pub async fn start_sync(&self, request: SyncRequest) -> Result<(), ActivityFailure> {
        self.cancellations.reset(request.connector_id);
        self.run(request.connector_id, "start_sync", async {
            sync_status::sync_started(
                &self.engine.store().connectors,
                request.connector_id,
                request.sync_time,
            )
            .await?;
            Ok(())
        })
        .await
    }

    /// Initial worklist: every tracked scope, then every tracked container so
    /// that containers outside any readable parent are revisited too.
    #[instrument(skip(self), fields(connector_id = %request.connector_id))]
    pub async fn seed_work(&self, request: SyncRequest) -> Result<Vec<WorkUnit>, ActivityFailure> {
        self.run(request.connector_id, "seed_work", async {
            let store = self.engine.store();
            let mut units = Vec::new();
            let scopes = store.scopes.find_all(request.connector_id).await?;
            for scope in &scopes {
                units.push(WorkUnit::Scope {
                    scope_external_id: scope.external_id.clone(),
                });
            }
            for scope in &scopes {
                for row in store
                    .containers
                    .find_by_scope(request.connector_id, &scope.external_id)
                    .await?
                {
                    let kind: NodeKind = row.kind.parse()?;
                    units.push(WorkUnit::Container {
                        node: ResourceRef::new(kind, row.external_id, row.scope_external_id),
                        grant: None,
                        discovered: None,
                    });
                }
            }
            info!(
                connector_id = %request.connector_id,
                scopes = scopes.len(),
                units = units.len(),
                "Seeded worklist"
            );
            Ok(units)
        })
        .await
    }

    /// Reconciles one work unit and returns the units it gives rise to.
    #[instrument(
        skip(self, unit),
        fields(connector_id = %request.connector_id, scope = %unit.scope_external_id())
    )]
    pub async fn reconcile_unit(
        &self,
        request: SyncRequest,
        unit: WorkUnit,
    ) -> Result<UnitSummary, ActivityFailure> {
        self.run(request.connector_id, "reconcile_unit", async {
            let ctx = self.context(request).await?;
            ctx.ensure_active()?;
            match unit {
                WorkUnit::Scope { scope_external_id } => {
                    self.scope_unit(&ctx, &scope_external_id).await
                }
                WorkUnit::Container {
                    node,
                    grant,
                    discovered,
                } => {
                    let outcome = self
                        .engine
                        .reconcile_container(&ctx, &node, grant, discovered.map(|d| *d))
                        .await?;
                    let follow_ups = if outcome.is_alive() {
                        let depth = self
                            .engine
                            .container_depth(ctx.connector_id(), node.kind, &node.external_id)
                            .await?;
                        let kinds: Vec<NodeKind> = node
                            .kind
                            .child_kinds()
                            .iter()
                            .copied()
                            .filter(|kind| *kind != node.kind || depth < node.kind.max_depth())
                            .collect();
                        children_units(&node, &kinds)
                    } else {
                        Vec::new()
                    };
                    Ok(UnitSummary {
                        outcome: Some(outcome),
                        leaves: None,
                        follow_ups,
                    })
                }
                WorkUnit::Children {
                    parent,
                    child_kind,
                    cursor,
                } => {
                    self.children_unit(&ctx, &parent, child_kind, cursor.as_deref())
                        .await
                }
            }
        })
        .await
    }

    /// Runs one garbage collection batch of a scope.
    #[instrument(skip(self), fields(connector_id = %request.connector_id))]
    pub async fn gc_batch(
        &self,
        request: SyncRequest,
        scope_external_id: String,
        cursor: Option<GcCursor>,
    ) -> Result<GcBatch, ActivityFailure> {
        self.run(request.connector_id, "gc_batch", async {
            let ctx = self.context(request).await?;
            self.gc.remove_batch(&ctx, &scope_external_id, cursor).await
        })
        .await
    }

    /// External ids of the scopes the connector currently tracks.
    pub async fn list_scopes(&self, connector_id: Uuid) -> Result<Vec<String>, ActivityFailure> {
        self.run(connector_id, "list_scopes", async {
            Ok(self
                .engine
                .store()
                .scopes
                .find_all(connector_id)
                .await?
                .into_iter()
                .map(|s| s.external_id)
                .collect())
        })
        .await
    }

    /// Progress note shown until the first sync completes.
    pub async fn report_progress(
        &self,
        connector_id: Uuid,
        progress: &str,
    ) -> Result<(), ActivityFailure> {
        self.run(connector_id, "report_progress", async {
            let connectors = &self.engine.store().connectors;
            let connector = connectors.get(connector_id).await?;
            if connector.first_successful_sync_time.is_none() {
                connectors.record_progress(connector_id, progress).await?;
            }
            Ok(())
        })
        .await
    }

    /// Records the final outcome of a sync on the connector row.
    #[instrument(skip(self, failure), fields(connector_id = %request.connector_id))]
    pub async fn finish_sync(
        &self,
        request: SyncRequest,
        failure: Option<&ActivityFailure>,
    ) -> Result<(), ActivityFailure> {
        let connectors = &self.engine.store().connectors;
        let finished_at = Utc::now();
        let result = match failure {
            None => sync_status::sync_succeeded(connectors, request.connector_id, finished_at)
                .await
                .map(|_| ()),
            // Revocation is recorded when it is first observed.
            Some(ActivityFailure::AuthRevoked { .. }) => Ok(()),
            Some(failure) => sync_status::sync_failed(
                connectors,
                request.connector_id,
                failure.connector_error_type(),
                finished_at,
            )
            .await
            .map(|_| ()),
        };
        result.map_err(|err| ActivityFailure::from(SyncError::from(err)))
    }

    /// Removes everything the connector ever synced, then the connector row.
    ///
    /// Runs even when the connector's credentials are gone: only the document
    /// store and the state store are touched.
    #[instrument(skip(self))]
    pub async fn cleanup_connector(
        &self,
        connector_id: Uuid,
    ) -> Result<CleanupSummary, ActivityFailure> {
        let started = Instant::now();
        self.cancellations.cancel(connector_id);
        let result = async {
            let ctx = self
                .engine
                .context(
                    connector_id,
                    self.cancellations.reset(connector_id),
                    false,
                    Utc::now(),
                )
                .await?;
            let store = self.engine.store();
            let mut summary = CleanupSummary::default();

            for scope in store.scopes.find_all(connector_id).await? {
                summary.leaves += store
                    .leaves
                    .find_by_scope(
                        connector_id,
                        &scope.external_id,
                        &NodeKind::leaf_kinds(ctx.provider),
                    )
                    .await?
                    .len();
                summary.containers += store
                    .containers
                    .find_by_scope(connector_id, &scope.external_id)
                    .await?
                    .len();
                self.engine.delete_scope(&ctx, &scope).await?;
                summary.scopes += 1;
            }

            store.connectors.delete(connector_id).await?;
            info!(
                connector_id = %connector_id,
                scopes = summary.scopes,
                containers = summary.containers,
                leaves = summary.leaves,
                "Connector cleaned up"
            );
            Ok::<_, SyncError>(summary)
        }
        .await;
        record_duration("cleanup_connector", started);
        result.map_err(|err| ActivityFailure::from(&err))
    }

    async fn context(&self, request: SyncRequest) -> Result<SyncContext, SyncError> {
        self.engine
            .context(
                request.connector_id,
                self.cancellations.token(request.connector_id),
                request.force_resync,
                request.sync_time,
            )
            .await
    }

    async fn scope_unit(
        &self,
        ctx: &SyncContext,
        scope_external_id: &str,
    ) -> Result<UnitSummary, SyncError> {
        let outcome = self.engine.reconcile_scope(ctx, scope_external_id).await?;
        let mut follow_ups = Vec::new();
        if outcome.is_alive() {
            if let Some(scope) = self
                .engine
                .store()
                .scopes
                .find_one(ctx.connector_id(), scope_external_id)
                .await?
            {
                let kind: NodeKind = scope.kind.parse()?;
                let node = ResourceRef::scope(kind, scope_external_id);
                let discoverable = policy::discoverable_children(kind, &scope);
                follow_ups = children_units(&node, &discoverable);
            }
        }
        Ok(UnitSummary {
            outcome: Some(outcome),
            leaves: None,
            follow_ups,
        })
    }

    async fn children_unit(
        &self,
        ctx: &SyncContext,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
    ) -> Result<UnitSummary, SyncError> {
        let Some(grant) = self.parent_grant(ctx, parent, child_kind).await? else {
            return Ok(UnitSummary::default());
        };
        let page = self
            .engine
            .walker()
            .children(ctx.client.as_ref(), &ctx.conn, parent, child_kind, cursor, grant)
            .await?;

        let leaves = if page.leaves.is_empty() {
            None
        } else {
            Some(
                self.engine
                    .reconcile_leaves(ctx, child_kind, &parent.scope_external_id, page.leaves)
                    .await?,
            )
        };
        Ok(UnitSummary {
            outcome: None,
            leaves,
            follow_ups: page.follow_ups,
        })
    }

    /// Readable grant under which `parent` lists children of `child_kind`.
    async fn parent_grant(
        &self,
        ctx: &SyncContext,
        parent: &ResourceRef,
        child_kind: NodeKind,
    ) -> Result<Option<Permission>, SyncError> {
        let store = self.engine.store();
        let grant = match parent.kind.level() {
            NodeLevel::Scope => store
                .scopes
                .find_one(ctx.connector_id(), &parent.external_id)
                .await?
                .map(|scope| scope.permission_for(child_kind)),
            _ => store
                .containers
                .find_one(ctx.connector_id(), parent.kind, &parent.external_id)
                .await?
                .map(|row| row.permission()),
        };
        Ok(grant.filter(Permission::is_readable))
    }

    /// Runs an activity body with timing and revocation handling.
    async fn run<T>(
        &self,
        connector_id: Uuid,
        activity: &'static str,
        body: impl Future<Output = Result<T, SyncError>>,
    ) -> Result<T, ActivityFailure> {
        let started = Instant::now();
        let result = body.await;
        record_duration(activity, started);
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_auth_revoked() {
                    self.on_auth_revoked(connector_id, &err).await;
                }
                Err(ActivityFailure::from(&err))
            }
        }
    }

    async fn on_auth_revoked(&self, connector_id: Uuid, err: &SyncError) {
        warn!(
            connector_id = %connector_id,
            error = %err,
            "Provider revoked access, cancelling connector activities"
        );
        self.cancellations.cancel(connector_id);
        if let Err(store_err) = sync_status::sync_failed(
            &self.engine.store().connectors,
            connector_id,
            ConnectorErrorType::OauthTokenRevoked,
            Utc::now(),
        )
        .await
        {
            warn!(
                connector_id = %connector_id,
                error = %store_err,
                "Failed to record revoked access on the connector"
            );
        }
    }
}

fn children_units(parent: &ResourceRef, kinds: &[NodeKind]) -> Vec<WorkUnit> {
    kinds
        .iter()
        .map(|child_kind| WorkUnit::Children {
            parent: parent.clone(),
            child_kind: *child_kind,
            cursor: None,
        })
        .collect()
}

fn record_duration(activity: &'static str, started: Instant) {
    histogram!("activity_duration_seconds", "activity" => activity)
        .record(started.elapsed().as_secs_f64());
}
