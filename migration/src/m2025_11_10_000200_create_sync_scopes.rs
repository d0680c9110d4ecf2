//! Migration to create the sync_scopes table.
//!
//! A scope is the top-level unit a provider organizes content under (brand,
//! help center, repository, workspace). Exactly one row exists per
//! `(connector_id, external_id)`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncScopes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncScopes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncScopes::ConnectorId).uuid().not_null())
                    .col(ColumnDef::new(SyncScopes::Kind).text().not_null())
                    .col(ColumnDef::new(SyncScopes::ExternalId).text().not_null())
                    .col(
                        ColumnDef::new(SyncScopes::Permission)
                            .text()
                            .not_null()
                            .default("read"),
                    )
                    .col(
                        ColumnDef::new(SyncScopes::HelpCenterPermission)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncScopes::TicketsPermission).text().null())
                    .col(ColumnDef::new(SyncScopes::Name).text().null())
                    .col(ColumnDef::new(SyncScopes::Url).text().null())
                    .col(ColumnDef::new(SyncScopes::Description).text().null())
                    .col(
                        ColumnDef::new(SyncScopes::LastUpsertedTs)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncScopes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncScopes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_scopes_connector_id")
                            .from(SyncScopes::Table, SyncScopes::ConnectorId)
                            .to(Connectors::Table, Connectors::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_scopes_connector_external")
                    .table(SyncScopes::Table)
                    .col(SyncScopes::ConnectorId)
                    .col(SyncScopes::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_scopes_connector_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncScopes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncScopes {
    Table,
    Id,
    ConnectorId,
    Kind,
    ExternalId,
    Permission,
    HelpCenterPermission,
    TicketsPermission,
    Name,
    Url,
    Description,
    LastUpsertedTs,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connectors {
    Table,
    Id,
}
