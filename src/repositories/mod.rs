//! # Repository Layer
//!
//! SeaORM-backed Permission & State Store. Every lookup is scoped by connector
//! id; lookups by unique key tolerate duplicate rows by logging and keeping the
//! oldest one instead of failing the sync.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

pub mod connector;
pub mod container;
pub mod leaf_document;
pub mod sync_scope;

pub use connector::{ConnectorRepository, NewConnector};
pub use container::{ContainerRepository, NewContainer};
pub use leaf_document::{LeafDocumentRepository, LeafUpsert};
pub use sync_scope::{NewSyncScope, ScopeDisplay, SyncScopeRepository};

/// Failures of the Permission & State Store. Always fatal to the unit of work.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store query failed: {0}")]
    Db(#[from] DbErr),
    #[error("connector {0} not found")]
    ConnectorNotFound(Uuid),
    #[error("invalid value in column {column}: '{value}'")]
    InvalidValue { column: &'static str, value: String },
    #[error("failed to encode {column}: {source}")]
    Encode {
        column: &'static str,
        source: serde_json::Error,
    },
}

/// All repositories over one shared pool.
#[derive(Debug, Clone)]
pub struct StateStore {
    pub connectors: ConnectorRepository,
    pub scopes: SyncScopeRepository,
    pub containers: ContainerRepository,
    pub leaves: LeafDocumentRepository,
}

impl StateStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            connectors: ConnectorRepository::new(db.clone()),
            scopes: SyncScopeRepository::new(db.clone()),
            containers: ContainerRepository::new(db.clone()),
            leaves: LeafDocumentRepository::new(db),
        }
    }
}

/// Keeps the first of several rows sharing a unique key.
///
/// Callers order rows deterministically (oldest first) before calling this.
pub(crate) fn first_of_unique<T>(
    mut rows: Vec<T>,
    table: &'static str,
    connector_id: Uuid,
    external_id: &str,
) -> Option<T> {
    if rows.len() > 1 {
        error!(
            table,
            connector_id = %connector_id,
            external_id,
            duplicates = rows.len(),
            "Data integrity violation: several rows share a unique key, using the oldest"
        );
    }
    if rows.is_empty() {
        None
    } else {
        Some(rows.swap_remove(0))
    }
}
