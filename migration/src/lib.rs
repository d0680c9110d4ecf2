//! Database migrations for the provider sync state store.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_000100_create_connectors;
mod m2025_11_10_000200_create_sync_scopes;
mod m2025_11_10_000300_create_containers;
mod m2025_11_10_000400_create_leaf_documents;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_000100_create_connectors::Migration),
            Box::new(m2025_11_10_000200_create_sync_scopes::Migration),
            Box::new(m2025_11_10_000300_create_containers::Migration),
            Box::new(m2025_11_10_000400_create_leaf_documents::Migration),
        ]
    }
}
