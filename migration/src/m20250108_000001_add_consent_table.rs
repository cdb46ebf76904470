use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create consents table
        manager
            .create_table(
                Table::create()
                    .table(Consent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Consent::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Consent::Granter))
                    .col(string(Consent::Requester))
                    .col(string(Consent::DataTypes)) // JSON-encoded Vec<String>
                    .col(string(Consent::Purpose))
                    .col(
                        ColumnDef::new(Consent::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(big_integer(Consent::CreatedAt))
                    .col(big_integer_null(Consent::GrantedAt))
                    .col(big_integer(Consent::ExpiresAt))
                    .col(big_integer(Consent::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // Lookups by the data owner
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_granter_requester")
                    .table(Consent::Table)
                    .col(Consent::Granter)
                    .col(Consent::Requester)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_requester")
                    .table(Consent::Table)
                    .col(Consent::Requester)
                    .to_owned(),
            )
            .await?;

        // Sweep scans active rows by deadline
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_status_expires")
                    .table(Consent::Table)
                    .col(Consent::Status)
                    .col(Consent::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // At most one pending request per (granter, requester). Partial indexes
        // are understood by both SQLite and PostgreSQL.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_consent_one_pending \
                 ON consents (granter, requester) WHERE status = 'pending'",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Consent::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Consent {
    #[sea_orm(iden = "consents")]
    Table,
    Id,
    Granter,
    Requester,
    DataTypes,
    Purpose,
    Status,
    CreatedAt,
    GrantedAt,
    ExpiresAt,
    UpdatedAt,
}
