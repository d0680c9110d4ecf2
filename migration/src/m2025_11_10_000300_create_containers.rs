//! Migration to create the containers table.
//!
//! Containers (categories, collections, channels, databases) hang below a
//! scope, optionally nested through `parent_external_id`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Containers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Containers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Containers::ConnectorId).uuid().not_null())
                    .col(ColumnDef::new(Containers::ScopeExternalId).text().not_null())
                    .col(ColumnDef::new(Containers::Kind).text().not_null())
                    .col(ColumnDef::new(Containers::ExternalId).text().not_null())
                    .col(ColumnDef::new(Containers::ParentExternalId).text().null())
                    .col(
                        ColumnDef::new(Containers::Permission)
                            .text()
                            .not_null()
                            .default("read"),
                    )
                    .col(ColumnDef::new(Containers::Name).text().null())
                    .col(ColumnDef::new(Containers::Description).text().null())
                    .col(ColumnDef::new(Containers::Url).text().null())
                    .col(
                        ColumnDef::new(Containers::LastUpsertedTs)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Containers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Containers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_containers_connector_id")
                            .from(Containers::Table, Containers::ConnectorId)
                            .to(Connectors::Table, Connectors::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_containers_connector_kind_external")
                    .table(Containers::Table)
                    .col(Containers::ConnectorId)
                    .col(Containers::Kind)
                    .col(Containers::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Scope sweeps (GC, subtree deletion) filter on the owning scope.
        manager
            .create_index(
                Index::create()
                    .name("idx_containers_connector_scope")
                    .table(Containers::Table)
                    .col(Containers::ConnectorId)
                    .col(Containers::ScopeExternalId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_containers_connector_kind_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_containers_connector_scope")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Containers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Containers {
    Table,
    Id,
    ConnectorId,
    ScopeExternalId,
    Kind,
    ExternalId,
    ParentExternalId,
    Permission,
    Name,
    Description,
    Url,
    LastUpsertedTs,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connectors {
    Table,
    Id,
}
