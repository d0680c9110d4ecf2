//! # Garbage Collector
//!
//! Batched, cursor-resumable sweeps over one scope. Each call to
//! [`GarbageCollector::remove_batch`] handles at most [`GC_BATCH_SIZE`] items
//! of one phase and returns the cursor to resume from; `None` means the scope
//! is fully collected.
//!
//! Deletes are idempotent and the cursor only moves past confirmed items, so a
//! batch interrupted at any point can simply be replayed. Two kinds of failed
//! items are the exception. An item that failed permanently is skipped. An
//! item that kept failing for `max_item_attempts` batches is skipped too.
//! Both are logged and counted, and the next sync visits them again.

use std::sync::Arc;

use chrono::Duration;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GcConfig;
use crate::connectors::ResourceRef;
use crate::engine::policy::{self, Indexability};
use crate::engine::{ReconciliationEngine, SyncContext};
use crate::error::SyncError;
use crate::executor;
use crate::ids::internal_id;
use crate::models::{container, leaf_document};
use crate::provider::{NodeKind, Permission};

/// Items handled per batch.
pub const GC_BATCH_SIZE: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcPhase {
    /// Containers whose grant is `none`.
    ForbiddenContainers,
    /// Leaves that no longer exist upstream.
    MissingLeaves,
    /// Leaves past the retention window.
    ExpiredLeaves,
    /// Containers left without children.
    EmptyContainers,
    /// Section downgrades and removal of the scope itself.
    Scope,
}

impl GcPhase {
    pub const ORDER: [GcPhase; 5] = [
        GcPhase::ForbiddenContainers,
        GcPhase::MissingLeaves,
        GcPhase::ExpiredLeaves,
        GcPhase::EmptyContainers,
        GcPhase::Scope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GcPhase::ForbiddenContainers => "forbidden_containers",
            GcPhase::MissingLeaves => "missing_leaves",
            GcPhase::ExpiredLeaves => "expired_leaves",
            GcPhase::EmptyContainers => "empty_containers",
            GcPhase::Scope => "scope",
        }
    }

    fn next(&self) -> Option<GcPhase> {
        let at = GcPhase::ORDER.iter().position(|p| p == self)?;
        GcPhase::ORDER.get(at + 1).copied()
    }
}

/// Resume point carried between batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcCursor {
    pub phase: GcPhase,
    /// Sort key of the last confirmed item of the phase: external id for
    /// containers, internal document id for leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Consecutive batches that stopped on the item right after `after`.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl GcCursor {
    pub fn start() -> Self {
        Self::at(GcPhase::ForbiddenContainers)
    }

    fn at(phase: GcPhase) -> Self {
        Self {
            phase,
            after: None,
            attempts: 0,
        }
    }
}

/// Result of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcBatch {
    pub processed_count: usize,
    pub next_cursor: Option<GcCursor>,
}

/// Outcome of one item, keyed for cursor advancement.
struct ItemResult {
    key: String,
    result: Result<(), SyncError>,
}

pub struct GarbageCollector {
    engine: Arc<ReconciliationEngine>,
    config: GcConfig,
}

impl GarbageCollector {
    pub fn new(engine: Arc<ReconciliationEngine>, config: GcConfig) -> Self {
        Self { engine, config }
    }

    /// Retention window for leaves with one, the connector override first.
    pub fn retention_days(&self, ctx: &SyncContext) -> u32 {
        ctx.connector
            .ticket_retention_days
            .and_then(|days| u32::try_from(days).ok())
            .unwrap_or(self.config.ticket_retention_days)
    }

    /// Collects one batch of `scope_external_id`, starting at `cursor`.
    ///
    /// Phases without work are skipped within the same call, so a returned
    /// cursor always points at a phase that may still hold items.
    pub async fn remove_batch(
        &self,
        ctx: &SyncContext,
        scope_external_id: &str,
        cursor: Option<GcCursor>,
    ) -> Result<GcBatch, SyncError> {
        ctx.ensure_active()?;
        let mut cursor = cursor.unwrap_or_else(GcCursor::start);

        loop {
            let items = match cursor.phase {
                GcPhase::ForbiddenContainers => {
                    self.forbidden_containers(ctx, scope_external_id, cursor.after.as_deref())
                        .await?
                }
                GcPhase::MissingLeaves => {
                    self.missing_leaves(ctx, scope_external_id, cursor.after.as_deref())
                        .await?
                }
                GcPhase::ExpiredLeaves => {
                    self.expired_leaves(ctx, scope_external_id, cursor.after.as_deref())
                        .await?
                }
                GcPhase::EmptyContainers => {
                    self.empty_containers(ctx, scope_external_id, cursor.after.as_deref())
                        .await?
                }
                GcPhase::Scope => {
                    let processed_count = self.scope(ctx, scope_external_id).await?;
                    return Ok(GcBatch {
                        processed_count,
                        next_cursor: None,
                    });
                }
            };

            let Some((fetched, results)) = items else {
                match cursor.phase.next() {
                    Some(phase) => {
                        cursor = GcCursor::at(phase);
                        continue;
                    }
                    None => {
                        return Ok(GcBatch {
                            processed_count: 0,
                            next_cursor: None,
                        });
                    }
                }
            };
            return self.settle(ctx, cursor, fetched, results);
        }
    }

    /// Turns per-item results into the batch outcome.
    ///
    /// The cursor stops before the first retryable failure. Permanent failures
    /// never stop it. Once the same position has stopped the cursor
    /// `max_item_attempts` times, the failure there is given up as well.
    fn settle(
        &self,
        ctx: &SyncContext,
        cursor: GcCursor,
        fetched: usize,
        results: Vec<ItemResult>,
    ) -> Result<GcBatch, SyncError> {
        let phase = cursor.phase;
        let mut last_try = cursor.attempts + 1 >= self.config.max_item_attempts;
        let mut confirmed_until = cursor.after.clone();
        let mut prefix_intact = true;
        let mut processed = 0;
        let mut skipped = 0;
        let mut failures = Vec::new();

        for item in results {
            match item.result {
                Ok(()) => {
                    processed += 1;
                    if prefix_intact {
                        confirmed_until = Some(item.key);
                    }
                }
                Err(err) => {
                    if is_fatal(&err) {
                        return Err(err);
                    }
                    let skip = prefix_intact && (!err.is_retryable() || last_try);
                    warn!(
                        connector_id = %ctx.connector_id(),
                        phase = phase.as_str(),
                        item = %item.key,
                        error = %err,
                        skipped = skip,
                        "GC item failed"
                    );
                    if skip {
                        // Only the item the cursor kept stopping on runs out.
                        if err.is_retryable() {
                            last_try = false;
                        }
                        skipped += 1;
                        confirmed_until = Some(item.key);
                    } else {
                        prefix_intact = false;
                    }
                    failures.push(err);
                }
            }
        }

        counter!("gc_items_processed_total", "phase" => phase.as_str())
            .increment(processed as u64);
        if !failures.is_empty() {
            counter!("gc_item_failures_total", "phase" => phase.as_str())
                .increment(failures.len() as u64);
        }
        if skipped > 0 {
            counter!("gc_items_skipped_total", "phase" => phase.as_str())
                .increment(skipped as u64);
        }
        if processed == 0 && skipped == 0 && !failures.is_empty() {
            return Err(SyncError::BatchFailed {
                failed: failures.len(),
                first_error: failures[0].to_string(),
            });
        }

        let phase_done = prefix_intact && (fetched as u64) < GC_BATCH_SIZE;
        let next_cursor = if phase_done {
            phase.next().map(GcCursor::at)
        } else {
            let attempts = match (prefix_intact, confirmed_until == cursor.after) {
                (true, _) => 0,
                (false, true) => cursor.attempts + 1,
                (false, false) => 1,
            };
            Some(GcCursor {
                phase,
                after: confirmed_until,
                attempts,
            })
        };
        debug!(
            connector_id = %ctx.connector_id(),
            phase = phase.as_str(),
            processed,
            skipped,
            failed = failures.len(),
            "GC batch done"
        );
        Ok(GcBatch {
            processed_count: processed,
            next_cursor,
        })
    }

    async fn forbidden_containers(
        &self,
        ctx: &SyncContext,
        scope_external_id: &str,
        after: Option<&str>,
    ) -> Result<Option<(usize, Vec<ItemResult>)>, SyncError> {
        let rows = self
            .engine
            .store()
            .containers
            .fetch_past_cursor(
                ctx.connector_id(),
                scope_external_id,
                Some(Permission::None),
                after,
                GC_BATCH_SIZE,
            )
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let fetched = rows.len();
        // Sequential: a subtree delete may already cover later rows.
        let mut results = Vec::with_capacity(fetched);
        for row in rows {
            let result = self.delete_container_if_present(ctx, &row, true).await;
            results.push(ItemResult {
                key: row.external_id,
                result,
            });
        }
        Ok(Some((fetched, results)))
    }

    async fn missing_leaves(
        &self,
        ctx: &SyncContext,
        scope_external_id: &str,
        after: Option<&str>,
    ) -> Result<Option<(usize, Vec<ItemResult>)>, SyncError> {
        let rows = self
            .engine
            .store()
            .leaves
            .fetch_past_cursor(ctx.connector_id(), scope_external_id, after, GC_BATCH_SIZE)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let fetched = rows.len();
        let results = executor::run(
            rows.iter(),
            |row| self.check_leaf_upstream(ctx, row),
            ctx.concurrency,
        )
        .await;
        Ok(Some((fetched, keyed(rows, results))))
    }

    async fn expired_leaves(
        &self,
        ctx: &SyncContext,
        scope_external_id: &str,
        after: Option<&str>,
    ) -> Result<Option<(usize, Vec<ItemResult>)>, SyncError> {
        let kinds: Vec<NodeKind> = NodeKind::leaf_kinds(ctx.provider)
            .into_iter()
            .filter(NodeKind::has_retention)
            .collect();
        if kinds.is_empty() {
            return Ok(None);
        }
        let cutoff = ctx.sync_time - Duration::days(i64::from(self.retention_days(ctx)));
        let rows = self
            .engine
            .store()
            .leaves
            .fetch_expired_past_cursor(
                ctx.connector_id(),
                scope_external_id,
                &kinds,
                cutoff,
                after,
                GC_BATCH_SIZE,
            )
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let fetched = rows.len();
        let results = executor::run(
            rows.iter(),
            |row| async move {
                self.engine
                    .delete_leaves(ctx, std::slice::from_ref(row))
                    .await
                    .map(|_| ())
            },
            ctx.concurrency,
        )
        .await;
        Ok(Some((fetched, keyed(rows, results))))
    }

    async fn empty_containers(
        &self,
        ctx: &SyncContext,
        scope_external_id: &str,
        after: Option<&str>,
    ) -> Result<Option<(usize, Vec<ItemResult>)>, SyncError> {
        let rows = self
            .engine
            .store()
            .containers
            .fetch_past_cursor(ctx.connector_id(), scope_external_id, None, after, GC_BATCH_SIZE)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let scope = self
            .engine
            .store()
            .scopes
            .find_one(ctx.connector_id(), scope_external_id)
            .await?;

        let fetched = rows.len();
        let mut results = Vec::with_capacity(fetched);
        for row in rows {
            // A container the scope no longer covers lives on its own grant;
            // dropping its row would lose that grant.
            let covered = match (&scope, row.node_kind()) {
                (Some(scope), Some(kind)) => scope.permission_for(kind).is_readable(),
                _ => false,
            };
            let result = if covered || !row.permission().is_readable() {
                match self.engine.store().containers.is_empty(&row).await {
                    Ok(true) => self.delete_container_if_present(ctx, &row, false).await,
                    Ok(false) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            } else {
                Ok(())
            };
            results.push(ItemResult {
                key: row.external_id,
                result,
            });
        }
        Ok(Some((fetched, results)))
    }

    /// Final phase: section downgrade and removal of a scope left with nothing.
    /// Returns how many of the two actions were taken.
    async fn scope(&self, ctx: &SyncContext, scope_external_id: &str) -> Result<usize, SyncError> {
        let store = self.engine.store();
        let connector_id = ctx.connector_id();
        let Some(mut scope) = store.scopes.find_one(connector_id, scope_external_id).await? else {
            return Ok(0);
        };
        let mut processed = 0;
        let kind: NodeKind = scope.kind.parse()?;

        if kind == NodeKind::ZendeskBrand
            && scope
                .help_center_permission()
                .is_some_and(|p| p.is_readable())
            && !store
                .containers
                .any_readable(connector_id, scope_external_id, NodeKind::ZendeskCategory)
                .await?
        {
            info!(
                connector_id = %connector_id,
                scope = scope_external_id,
                "Help center has no readable category left, revoking it"
            );
            scope = store
                .scopes
                .set_section_permission(
                    scope.id,
                    NodeKind::ZendeskHelpCenter,
                    Some(Permission::None),
                )
                .await?;
            processed += 1;
        }

        if scope.effective_permission().is_readable() {
            return Ok(processed);
        }
        let containers = store
            .containers
            .find_by_scope(connector_id, scope_external_id)
            .await?;
        let leaves = store
            .leaves
            .find_by_scope(connector_id, scope_external_id, &NodeKind::leaf_kinds(ctx.provider))
            .await?;
        if containers.is_empty() && leaves.is_empty() {
            self.engine.delete_scope(ctx, &scope).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Checks a tracked leaf against upstream and deletes it when gone.
    async fn check_leaf_upstream(
        &self,
        ctx: &SyncContext,
        row: &leaf_document::Model,
    ) -> Result<(), SyncError> {
        let kind: NodeKind = row.kind.parse()?;
        let node = ResourceRef::new(kind, row.external_id.clone(), row.scope_external_id.clone());
        let gone = match ctx.client.get_one(&ctx.conn, &node).await? {
            None => true,
            Some(remote) => {
                policy::indexability(kind, remote.state.as_deref()) == Indexability::Delete
            }
        };
        if gone {
            self.engine
                .delete_leaves(ctx, std::slice::from_ref(row))
                .await?;
        }
        Ok(())
    }

    /// Deletes a container subtree when the row still exists. With `whole`
    /// unset only the container's own folder and row go.
    async fn delete_container_if_present(
        &self,
        ctx: &SyncContext,
        row: &container::Model,
        whole: bool,
    ) -> Result<(), SyncError> {
        let kind: NodeKind = row.kind.parse()?;
        let Some(current) = self
            .engine
            .store()
            .containers
            .find_one(ctx.connector_id(), kind, &row.external_id)
            .await?
        else {
            return Ok(());
        };
        if whole {
            return self.engine.delete_container_subtree(ctx, &current).await;
        }
        ctx.ensure_active()?;
        self.engine
            .documents()
            .delete_folder(
                ctx.data_source_id(),
                &internal_id(kind, ctx.connector_id(), &current.external_id),
            )
            .await?;
        self.engine
            .store()
            .containers
            .destroy_ids(&[current.id])
            .await?;
        Ok(())
    }
}

/// Pairs leaf results with their cursor key.
fn keyed(rows: Vec<leaf_document::Model>, results: Vec<Result<(), SyncError>>) -> Vec<ItemResult> {
    rows.into_iter()
        .zip(results)
        .map(|(row, result)| ItemResult {
            key: row.document_id,
            result,
        })
        .collect()
}

/// Errors that abort a batch instead of being counted against an item.
fn is_fatal(err: &SyncError) -> bool {
    err.is_auth_revoked() || matches!(err, SyncError::Store(_) | SyncError::Cancelled(_))
}
