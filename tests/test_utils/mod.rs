//! Test utilities for the sync core.
//!
//! Provides an in-memory SQLite state store with migrations applied, a
//! scriptable provider, a document store that can be told to fail, and a
//! [`Harness`] wiring them into the engine, activities and local driver.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use tokio_util::sync::CancellationToken;

use provider_sync::activities::Activities;
use provider_sync::config::{ConcurrencyConfig, DriverConfig, GcConfig, RateLimitPolicyConfig};
use provider_sync::connectors::{
    ClientError, ConnectionRef, Page, ProviderClient, ProviderClients, RemoteResource, ResourceRef,
};
use provider_sync::documents::{
    DocumentStore, DocumentStoreError, DocumentUpsert, FolderUpsert, InMemoryDocumentStore,
};
use provider_sync::driver::LocalDriver;
use provider_sync::engine::{ReconciliationEngine, SyncContext};
use provider_sync::gc::GarbageCollector;
use provider_sync::models::connector;
use provider_sync::provider::{NodeKind, NodeLevel, Permission, ProviderKind};
use provider_sync::repositories::{NewConnector, NewContainer, NewSyncScope, StateStore};
use provider_sync::sync_status::CancellationRegistry;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    // Fixtures insert child rows without their parents.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Sets up an in-memory SQLite database and returns it behind an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Fixed point in time used for upstream modification stamps.
pub fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
}

/// A node as the fake provider stores it.
#[derive(Debug, Clone)]
struct FakeNode {
    scope_external_id: String,
    resource: RemoteResource,
}

#[derive(Default)]
struct FakeState {
    nodes: BTreeMap<(NodeKind, String), FakeNode>,
    page_size: usize,
    /// Failures consumed by the next calls, whatever they are.
    next_failures: VecDeque<ClientError>,
    /// External ids whose `get_one` keeps failing until cleared.
    broken: HashSet<String>,
    /// External ids whose `get_one` is refused with a 403.
    forbidden: HashSet<String>,
    revoked: bool,
    list_calls: usize,
    get_calls: usize,
}

/// Scriptable in-memory provider.
pub struct FakeProvider {
    provider: ProviderKind,
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            state: Mutex::new(FakeState {
                page_size: 50,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.lock().page_size = page_size;
        self
    }

    /// Adds a scope node (brand, help center, repo, workspace).
    pub fn put_scope(&self, external_id: &str, title: &str) {
        let mut resource = RemoteResource::new(self.provider.scope_kind(), external_id);
        resource.title = Some(title.to_string());
        resource.url = Some(format!("https://example.test/{external_id}"));
        self.put(external_id, resource);
    }

    /// Adds a container below the scope or below `parent`.
    pub fn put_container(
        &self,
        scope: &str,
        kind: NodeKind,
        external_id: &str,
        parent: Option<&str>,
        title: &str,
    ) {
        let mut resource = RemoteResource::new(kind, external_id);
        resource.parent_external_id = parent.map(str::to_string);
        resource.title = Some(title.to_string());
        self.put(scope, resource);
    }

    /// Adds a leaf with a body and an upstream modification time.
    #[allow(clippy::too_many_arguments)]
    pub fn put_leaf(
        &self,
        scope: &str,
        kind: NodeKind,
        external_id: &str,
        parent: Option<&str>,
        title: &str,
        body: &str,
        updated_at: DateTime<Utc>,
    ) {
        let mut resource = RemoteResource::new(kind, external_id);
        resource.parent_external_id = parent.map(str::to_string);
        resource.title = Some(title.to_string());
        resource.body = Some(body.to_string());
        resource.updated_at = Some(updated_at);
        resource.created_at = Some(ts(1));
        resource.url = Some(format!("https://example.test/{kind}/{external_id}"));
        if kind == NodeKind::ZendeskTicket {
            resource.state = Some("solved".to_string());
        }
        self.put(scope, resource);
    }

    pub fn put(&self, scope: &str, resource: RemoteResource) {
        let kind = resource.kind.unwrap_or(self.provider.scope_kind());
        self.lock().nodes.insert(
            (kind, resource.external_id.clone()),
            FakeNode {
                scope_external_id: scope.to_string(),
                resource,
            },
        );
    }

    /// Applies `change` to a stored node.
    pub fn edit(
        &self,
        kind: NodeKind,
        external_id: &str,
        change: impl FnOnce(&mut RemoteResource),
    ) {
        if let Some(node) = self.lock().nodes.get_mut(&(kind, external_id.to_string())) {
            change(&mut node.resource);
        }
    }

    pub fn remove(&self, kind: NodeKind, external_id: &str) {
        self.lock().nodes.remove(&(kind, external_id.to_string()));
    }

    /// The next call, list or get, fails with `err`.
    pub fn fail_next(&self, err: ClientError) {
        self.lock().next_failures.push_back(err);
    }

    /// `get_one` of `external_id` fails until [`heal`](Self::heal) is called.
    pub fn break_node(&self, external_id: &str) {
        self.lock().broken.insert(external_id.to_string());
    }

    pub fn heal(&self, external_id: &str) {
        self.lock().broken.remove(external_id);
    }

    /// `get_one` of `external_id` fails permanently.
    pub fn forbid_node(&self, external_id: &str) {
        self.lock().forbidden.insert(external_id.to_string());
    }

    /// Every further call fails as if the token was revoked.
    pub fn revoke(&self) {
        self.lock().revoked = true;
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    fn check(&self, state: &mut FakeState) -> Result<(), ClientError> {
        if state.revoked {
            return Err(ClientError::AuthRevoked {
                provider: self.provider,
                message: "invalid_grant".to_string(),
            });
        }
        match state.next_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn list_page(
        &self,
        _conn: &ConnectionRef,
        parent: &ResourceRef,
        child_kind: NodeKind,
        cursor: Option<&str>,
    ) -> Result<Page, ClientError> {
        let mut state = self.lock();
        state.list_calls += 1;
        self.check(&mut state)?;

        let below_scope = parent.kind.level() == NodeLevel::Scope;
        let matching: Vec<RemoteResource> = state
            .nodes
            .iter()
            .filter(|((kind, _), node)| {
                *kind == child_kind
                    && node.scope_external_id == parent.scope_external_id
                    && if below_scope {
                        node.resource.parent_external_id.is_none()
                    } else {
                        node.resource.parent_external_id.as_deref()
                            == Some(parent.external_id.as_str())
                    }
            })
            .map(|(_, node)| node.resource.clone())
            .collect();

        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (offset + state.page_size).min(matching.len());
        let items = matching.get(offset..end).unwrap_or_default().to_vec();
        let next_cursor = (end < matching.len()).then(|| end.to_string());
        Ok(Page { items, next_cursor })
    }

    async fn get_one(
        &self,
        _conn: &ConnectionRef,
        node: &ResourceRef,
    ) -> Result<Option<RemoteResource>, ClientError> {
        let mut state = self.lock();
        state.get_calls += 1;
        self.check(&mut state)?;
        if state.broken.contains(&node.external_id) {
            return Err(ClientError::transient(self.provider, "upstream 502"));
        }
        if state.forbidden.contains(&node.external_id) {
            return Err(ClientError::Permanent {
                provider: self.provider,
                status: Some(403),
                message: "resource not accessible by integration".to_string(),
            });
        }
        Ok(state
            .nodes
            .get(&(node.kind, node.external_id.clone()))
            .map(|n| n.resource.clone()))
    }
}

/// In-memory document store whose writes can be made to fail per id.
#[derive(Default)]
pub struct FlakyDocumentStore {
    inner: InMemoryDocumentStore,
    failing: Mutex<HashSet<String>>,
}

impl FlakyDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryDocumentStore {
        &self.inner
    }

    /// Writes and deletes of `id` fail with a 503 until [`recover`](Self::recover).
    pub fn fail_on(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn recover(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    fn check(&self, id: &str) -> Result<(), DocumentStoreError> {
        if self.failing.lock().unwrap().contains(id) {
            return Err(DocumentStoreError::Http {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyDocumentStore {
    async fn upsert_document(
        &self,
        data_source_id: &str,
        doc: DocumentUpsert,
    ) -> Result<(), DocumentStoreError> {
        self.check(&doc.document_id)?;
        self.inner.upsert_document(data_source_id, doc).await
    }

    async fn upsert_folder(
        &self,
        data_source_id: &str,
        folder: FolderUpsert,
    ) -> Result<(), DocumentStoreError> {
        self.check(&folder.folder_id)?;
        self.inner.upsert_folder(data_source_id, folder).await
    }

    async fn delete_document(
        &self,
        data_source_id: &str,
        document_id: &str,
    ) -> Result<(), DocumentStoreError> {
        self.check(document_id)?;
        self.inner.delete_document(data_source_id, document_id).await
    }

    async fn delete_folder(
        &self,
        data_source_id: &str,
        folder_id: &str,
    ) -> Result<(), DocumentStoreError> {
        self.check(folder_id)?;
        self.inner.delete_folder(data_source_id, folder_id).await
    }
}

/// Engine, activities and driver over one connector of one provider.
pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub store: StateStore,
    pub documents: Arc<FlakyDocumentStore>,
    pub provider: Arc<FakeProvider>,
    pub engine: Arc<ReconciliationEngine>,
    pub activities: Arc<Activities>,
    pub driver: LocalDriver,
    pub connector: connector::Model,
}

impl Harness {
    pub async fn new(provider: ProviderKind) -> Result<Self> {
        Self::with_provider(FakeProvider::new(provider), None).await
    }

    /// Builds the harness around `provider`, optionally overriding the
    /// connector's retention window.
    pub async fn with_provider(
        provider: FakeProvider,
        ticket_retention_days: Option<i32>,
    ) -> Result<Self> {
        let db = setup_test_db_arc().await?;
        let store = StateStore::new(db.clone());
        let connector = store
            .connectors
            .create(NewConnector {
                provider: provider.provider(),
                connection_id: "conn-1".to_string(),
                workspace_id: "ws-1".to_string(),
                data_source_id: "ds-1".to_string(),
                metadata: Some(serde_json::json!({ "subdomain": "acme" })),
                ticket_retention_days,
            })
            .await?;

        let provider = Arc::new(provider);
        let documents = Arc::new(FlakyDocumentStore::new());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            documents.clone(),
            ProviderClients::new().with(provider.clone()),
            ConcurrencyConfig::default(),
        ));
        let gc = GarbageCollector::new(engine.clone(), GcConfig::default());
        let activities = Arc::new(Activities::new(
            engine.clone(),
            gc,
            CancellationRegistry::new(),
        ));
        let driver = LocalDriver::new(
            activities.clone(),
            RateLimitPolicyConfig {
                base_seconds: 0,
                max_seconds: 0,
                jitter_factor: 0.0,
                provider_overrides: BTreeMap::new(),
            },
            DriverConfig { max_attempts: 3 },
        );

        Ok(Self {
            db,
            store,
            documents,
            provider,
            engine,
            activities,
            driver,
            connector,
        })
    }

    pub fn connector_id(&self) -> uuid::Uuid {
        self.connector.id
    }

    pub fn docs(&self) -> &InMemoryDocumentStore {
        self.documents.inner()
    }

    pub fn id(&self, kind: NodeKind, external_id: &str) -> String {
        provider_sync::ids::internal_id(kind, self.connector.id, external_id)
    }

    pub async fn context(&self, force_resync: bool) -> Result<SyncContext> {
        Ok(self
            .engine
            .context(self.connector.id, CancellationToken::new(), force_resync, Utc::now())
            .await?)
    }

    /// Tracks a scope with a single grant.
    pub async fn grant_scope(&self, external_id: &str, permission: Permission) -> Result<()> {
        self.store
            .scopes
            .upsert_grant(NewSyncScope {
                connector_id: self.connector.id,
                kind: self.provider.provider().scope_kind(),
                external_id: external_id.to_string(),
                permission,
                help_center_permission: None,
                tickets_permission: None,
            })
            .await?;
        Ok(())
    }

    /// Tracks a Zendesk brand with per-section grants.
    pub async fn grant_brand(
        &self,
        external_id: &str,
        help_center: Option<Permission>,
        tickets: Option<Permission>,
    ) -> Result<()> {
        self.store
            .scopes
            .upsert_grant(NewSyncScope {
                connector_id: self.connector.id,
                kind: NodeKind::ZendeskBrand,
                external_id: external_id.to_string(),
                permission: Permission::None,
                help_center_permission: help_center,
                tickets_permission: tickets,
            })
            .await?;
        Ok(())
    }

    /// Tracks a container with an explicit grant.
    pub async fn grant_container(
        &self,
        scope: &str,
        kind: NodeKind,
        external_id: &str,
        parent: Option<&str>,
        permission: Permission,
    ) -> Result<()> {
        self.store
            .containers
            .create(NewContainer {
                connector_id: self.connector.id,
                scope_external_id: scope.to_string(),
                kind,
                external_id: external_id.to_string(),
                parent_external_id: parent.map(str::to_string),
                permission,
            })
            .await?;
        Ok(())
    }

    /// Changes the grant of a tracked container.
    pub async fn set_container_permission(
        &self,
        kind: NodeKind,
        external_id: &str,
        permission: Permission,
    ) -> Result<()> {
        let row = self
            .store
            .containers
            .find_one(self.connector.id, kind, external_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("container {external_id} not tracked"))?;
        self.store.containers.set_permission(row.id, permission).await?;
        Ok(())
    }

    pub async fn leaf_count(&self, scope: &str) -> Result<usize> {
        Ok(self
            .store
            .leaves
            .find_by_scope(
                self.connector.id,
                scope,
                &NodeKind::leaf_kinds(self.provider.provider()),
            )
            .await?
            .len())
    }
}
