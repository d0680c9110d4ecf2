//! Resource tree walker
//!
//! Discovery is deliberately shallow: [`TreeWalker::children`] returns one page
//! of a node's immediate children and never descends. Deeper levels are
//! reached through [`WorkUnit`]s queued on a [`Worklist`], so every level (and
//! every page) is an independently retryable unit of work.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::connectors::{ClientError, ConnectionRef, ProviderClient, RemoteResource, ResourceRef};
use crate::ids::{internal_id, section_id};
use crate::provider::{NodeKind, NodeLevel, Permission};
use crate::repositories::{StateStore, StoreError};

/// Upper bound on container hops followed when computing a parent chain.
pub const MAX_CHAIN_DEPTH: usize = 16;

/// One schedulable step of a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum WorkUnit {
    /// Reconcile a scope row.
    Scope { scope_external_id: String },
    /// Reconcile a container. `grant` applies only when no row exists yet.
    Container {
        node: ResourceRef,
        grant: Option<Permission>,
        discovered: Option<Box<RemoteResource>>,
    },
    /// List one page of `child_kind` children of `parent`.
    Children {
        parent: ResourceRef,
        child_kind: NodeKind,
        cursor: Option<String>,
    },
}

impl WorkUnit {
    /// Key used to drop repeated scope and container units within one pass.
    fn dedup_key(&self) -> Option<String> {
        match self {
            WorkUnit::Scope { scope_external_id } => Some(format!("scope:{scope_external_id}")),
            WorkUnit::Container { node, .. } => {
                Some(format!("{}:{}", node.kind, node.external_id))
            }
            WorkUnit::Children { .. } => None,
        }
    }

    pub fn scope_external_id(&self) -> &str {
        match self {
            WorkUnit::Scope { scope_external_id } => scope_external_id,
            WorkUnit::Container { node, .. } => &node.scope_external_id,
            WorkUnit::Children { parent, .. } => &parent.scope_external_id,
        }
    }
}

/// FIFO queue of pending work units.
#[derive(Debug, Default)]
pub struct Worklist {
    queue: VecDeque<WorkUnit>,
    seen: HashSet<String>,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `unit` unless an equivalent scope or container unit was already
    /// queued in this pass. Returns whether it was queued.
    pub fn push(&mut self, unit: WorkUnit) -> bool {
        if let Some(key) = unit.dedup_key() {
            if !self.seen.insert(key) {
                return false;
            }
        }
        self.queue.push_back(unit);
        true
    }

    pub fn extend(&mut self, units: impl IntoIterator<Item = WorkUnit>) {
        for unit in units {
            self.push(unit);
        }
    }

    pub fn pop(&mut self) -> Option<WorkUnit> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// A page of discovered children plus the units it gives rise to.
#[derive(Debug, Clone, Default)]
pub struct ChildPage {
    /// Discovered leaves, reconciled by the caller.
    pub leaves: Vec<RemoteResource>,
    /// Container units for discovered child containers and the next page.
    pub follow_ups: Vec<WorkUnit>,
}

impl ChildPage {
    pub fn has_more(&self) -> bool {
        self.follow_ups
            .iter()
            .any(|u| matches!(u, WorkUnit::Children { .. }))
    }
}

/// Child discovery and parent chain computation.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    store: StateStore,
}

impl TreeWalker {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Fetches one page of `child_kind` children of `parent`.
    ///
    /// Child containers become [`WorkUnit::Container`] follow-ups carrying
    /// `grant`, the permission inherited from the parent. Items of an unexpected
    /// kind are dropped.
    pub async fn children(
        &self,
        client: &dyn ProviderClient,
        conn: &ConnectionRef,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
        grant: Permission,
    ) -> Result<ChildPage, ClientError> {
        let page = client.list_page(conn, parent, child_kind, cursor).await?;
        let mut out = ChildPage::default();

        for item in page.items {
            if item.kind.is_some_and(|k| k != child_kind) {
                warn!(
                    connector_id = %conn.connector_id,
                    expected = %child_kind,
                    external_id = %item.external_id,
                    "Dropping child of unexpected kind"
                );
                continue;
            }
            match child_kind.level() {
                NodeLevel::Leaf => out.leaves.push(item),
                _ => out.follow_ups.push(WorkUnit::Container {
                    node: ResourceRef::new(
                        child_kind,
                        item.external_id.clone(),
                        parent.scope_external_id.clone(),
                    ),
                    grant: Some(grant),
                    discovered: Some(Box::new(item)),
                }),
            }
        }

        if let Some(next) = page.next_cursor {
            out.follow_ups.push(WorkUnit::Children {
                parent: parent.clone(),
                child_kind,
                cursor: Some(next),
            });
        }
        Ok(out)
    }

    /// Internal ids from the immediate parent of `node` up to its scope root.
    ///
    /// `parent_external_id` is the node's parent container, `None` when it
    /// hangs off the scope (or a section of it). Container links are resolved
    /// from the state store; a missing link truncates the chain there and the
    /// section folder and scope root are still appended when they exist.
    pub async fn parent_chain(
        &self,
        connector_id: Uuid,
        node: &ResourceRef,
        parent_external_id: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let mut chain = Vec::new();
        if node.kind.level() == NodeLevel::Scope {
            return Ok(chain);
        }

        let mut visited = HashSet::new();
        if node.kind.level() == NodeLevel::Container {
            visited.insert(node.external_id.clone());
        }

        let container_kind = node.kind.parent_container_kind();
        let mut current = parent_external_id.map(str::to_string);
        while let (Some(kind), Some(external_id)) = (container_kind, current.take()) {
            if chain.len() >= MAX_CHAIN_DEPTH {
                warn!(
                    connector_id = %connector_id,
                    node = %node.external_id,
                    depth = chain.len(),
                    "Parent chain exceeds the depth cap, truncating"
                );
                break;
            }
            if !visited.insert(external_id.clone()) {
                warn!(
                    connector_id = %connector_id,
                    node = %node.external_id,
                    at = %external_id,
                    "Cycle in container parents, truncating chain"
                );
                break;
            }
            match self
                .store
                .containers
                .find_one(connector_id, kind, &external_id)
                .await?
            {
                Some(row) => {
                    chain.push(internal_id(kind, connector_id, &external_id));
                    current = row.parent_external_id;
                }
                None => {
                    warn!(
                        connector_id = %connector_id,
                        node = %node.external_id,
                        missing = %external_id,
                        "Broken parent link, using the resolvable prefix"
                    );
                }
            }
        }

        if let Some(section) = node.kind.section() {
            chain.push(section_id(section, connector_id, &node.scope_external_id));
        }

        match self
            .store
            .scopes
            .find_one(connector_id, &node.scope_external_id)
            .await?
            .and_then(|row| row.node_kind())
        {
            Some(scope_kind) => {
                chain.push(internal_id(scope_kind, connector_id, &node.scope_external_id))
            }
            None => warn!(
                connector_id = %connector_id,
                scope = %node.scope_external_id,
                "Scope row missing, parent chain has no root"
            ),
        }
        Ok(chain)
    }
}
