use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let id_col = match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => ColumnDef::new(AuditLogs::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
            _ => ColumnDef::new(AuditLogs::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
        };

        // Append-only: rows are never updated or deleted
        manager
            .create_table(
                Table::create()
                    .table(AuditLogs::Table)
                    .if_not_exists()
                    .col(id_col)
                    .col(string(AuditLogs::Action))
                    .col(string(AuditLogs::Owner))
                    .col(string(AuditLogs::Counterparty))
                    .col(string_null(AuditLogs::ConsentId))
                    .col(string_null(AuditLogs::DataType))
                    .col(string_null(AuditLogs::Purpose))
                    .col(string_null(AuditLogs::IpAddress))
                    .col(string_null(AuditLogs::UserAgent))
                    .col(big_integer(AuditLogs::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_audit_logs_owner")
                    .table(AuditLogs::Table)
                    .col(AuditLogs::Owner)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_audit_logs_counterparty")
                    .table(AuditLogs::Table)
                    .col(AuditLogs::Counterparty)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_audit_logs_created")
                    .table(AuditLogs::Table)
                    .col(AuditLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuditLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuditLogs {
    Table,
    Id,
    Action,
    Owner,
    Counterparty,
    ConsentId,
    DataType,
    Purpose,
    IpAddress,
    UserAgent,
    CreatedAt,
}
