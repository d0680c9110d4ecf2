//! Migration to create the leaf_documents table.
//!
//! Each row mirrors one document store entry (article, ticket, issue,
//! thread, page) together with the timestamps used for staleness checks.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LeafDocuments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LeafDocuments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LeafDocuments::ConnectorId).uuid().not_null())
                    .col(
                        ColumnDef::new(LeafDocuments::ScopeExternalId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LeafDocuments::ContainerExternalId)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(LeafDocuments::Kind).text().not_null())
                    .col(ColumnDef::new(LeafDocuments::ExternalId).text().not_null())
                    .col(ColumnDef::new(LeafDocuments::Title).text().null())
                    .col(ColumnDef::new(LeafDocuments::State).text().null())
                    .col(ColumnDef::new(LeafDocuments::DocumentId).text().not_null())
                    .col(ColumnDef::new(LeafDocuments::Parents).json_binary().null())
                    .col(ColumnDef::new(LeafDocuments::SourceUrl).text().null())
                    .col(
                        ColumnDef::new(LeafDocuments::UpstreamUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(LeafDocuments::LastUpsertedTs)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(LeafDocuments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(LeafDocuments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_leaf_documents_connector_id")
                            .from(LeafDocuments::Table, LeafDocuments::ConnectorId)
                            .to(Connectors::Table, Connectors::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_leaf_documents_connector_kind_external")
                    .table(LeafDocuments::Table)
                    .col(LeafDocuments::ConnectorId)
                    .col(LeafDocuments::Kind)
                    .col(LeafDocuments::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_leaf_documents_connector_container")
                    .table(LeafDocuments::Table)
                    .col(LeafDocuments::ConnectorId)
                    .col(LeafDocuments::ContainerExternalId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_leaf_documents_connector_kind_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_leaf_documents_connector_container")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(LeafDocuments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LeafDocuments {
    Table,
    Id,
    ConnectorId,
    ScopeExternalId,
    ContainerExternalId,
    Kind,
    ExternalId,
    Title,
    State,
    DocumentId,
    Parents,
    SourceUrl,
    UpstreamUpdatedAt,
    LastUpsertedTs,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connectors {
    Table,
    Id,
}
