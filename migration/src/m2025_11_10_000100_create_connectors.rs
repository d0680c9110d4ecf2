//! Migration to create the connectors table.
//!
//! One row per workspace connection to a provider, carrying the last-sync
//! bookkeeping surfaced to users.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connectors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connectors::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connectors::Provider).text().not_null())
                    .col(ColumnDef::new(Connectors::ConnectionId).text().not_null())
                    .col(ColumnDef::new(Connectors::WorkspaceId).text().not_null())
                    .col(ColumnDef::new(Connectors::DataSourceId).text().not_null())
                    .col(ColumnDef::new(Connectors::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(Connectors::TicketRetentionDays)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connectors::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Connectors::LastSyncStatus).text().null())
                    .col(
                        ColumnDef::new(Connectors::LastSyncStartTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connectors::LastSyncFinishTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connectors::LastSyncSuccessfulTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connectors::FirstSuccessfulSyncTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Connectors::FirstSyncProgress).text().null())
                    .col(ColumnDef::new(Connectors::ErrorType).text().null())
                    .col(
                        ColumnDef::new(Connectors::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connectors::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connectors_provider")
                    .table(Connectors::Table)
                    .col(Connectors::Provider)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_connectors_provider").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Connectors::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connectors {
    Table,
    Id,
    Provider,
    ConnectionId,
    WorkspaceId,
    DataSourceId,
    Metadata,
    TicketRetentionDays,
    Enabled,
    LastSyncStatus,
    LastSyncStartTime,
    LastSyncFinishTime,
    LastSyncSuccessfulTime,
    FirstSuccessfulSyncTime,
    FirstSyncProgress,
    ErrorType,
    CreatedAt,
    UpdatedAt,
}
