use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create users table
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Subject)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Users::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(string(Users::Name))
                    .col(string(Users::PasswordHash))
                    .col(
                        ColumnDef::new(Users::IsAdmin)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(Users::CreatedAt))
                    .col(
                        ColumnDef::new(Users::Enabled)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .to_owned(),
            )
            .await?;

        // Category attributes, one JSON document per (owner, category)
        manager
            .create_table(
                Table::create()
                    .table(ProfileAttributes::Table)
                    .if_not_exists()
                    .col(string(ProfileAttributes::Owner))
                    .col(string(ProfileAttributes::Category))
                    .col(string(ProfileAttributes::Document))
                    .col(big_integer(ProfileAttributes::UpdatedAt))
                    .primary_key(
                        Index::create()
                            .col(ProfileAttributes::Owner)
                            .col(ProfileAttributes::Category),
                    )
                    .to_owned(),
            )
            .await?;

        // Create access_tokens table
        manager
            .create_table(
                Table::create()
                    .table(AccessTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccessTokens::Token)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(AccessTokens::Subject))
                    .col(big_integer(AccessTokens::CreatedAt))
                    .col(big_integer(AccessTokens::ExpiresAt))
                    .col(
                        ColumnDef::new(AccessTokens::Revoked)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_access_tokens_expires")
                    .table(AccessTokens::Table)
                    .col(AccessTokens::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // Create job_executions table with backend-specific ID type
        let id_col = match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => ColumnDef::new(JobExecutions::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
            _ => ColumnDef::new(JobExecutions::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
        };

        manager
            .create_table(
                Table::create()
                    .table(JobExecutions::Table)
                    .if_not_exists()
                    .col(id_col)
                    .col(string(JobExecutions::JobName))
                    .col(big_integer(JobExecutions::StartedAt))
                    .col(big_integer_null(JobExecutions::CompletedAt))
                    .col(
                        ColumnDef::new(JobExecutions::Status)
                            .string()
                            .not_null()
                            .default("running"),
                    )
                    .col(string_null(JobExecutions::ErrorMessage))
                    .col(big_integer_null(JobExecutions::RecordsProcessed))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_job_executions_started")
                    .table(JobExecutions::Table)
                    .col(JobExecutions::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobExecutions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AccessTokens::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProfileAttributes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Subject,
    Email,
    Name,
    PasswordHash,
    IsAdmin,
    CreatedAt,
    Enabled,
}

#[derive(DeriveIden)]
enum ProfileAttributes {
    Table,
    Owner,
    Category,
    Document,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AccessTokens {
    Table,
    Token,
    Subject,
    CreatedAt,
    ExpiresAt,
    Revoked,
}

#[derive(DeriveIden)]
enum JobExecutions {
    Table,
    Id,
    JobName,
    StartedAt,
    CompletedAt,
    Status,
    ErrorMessage,
    RecordsProcessed,
}
