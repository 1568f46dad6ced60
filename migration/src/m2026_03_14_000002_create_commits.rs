//! Migration to create the commits table.
//!
//! One row per (repository, sha); rows are dropped with their owning
//! repository via ON DELETE CASCADE.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commits::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Commits::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Commits::RepositoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Commits::Sha).text().not_null())
                    .col(ColumnDef::new(Commits::Message).text().not_null())
                    .col(ColumnDef::new(Commits::AuthorName).text().not_null())
                    .col(ColumnDef::new(Commits::AuthorEmail).text().not_null())
                    .col(
                        ColumnDef::new(Commits::AuthorDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Commits::CommitterName).text().not_null())
                    .col(ColumnDef::new(Commits::CommitterEmail).text().not_null())
                    .col(
                        ColumnDef::new(Commits::CommitDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Commits::Url).text().not_null())
                    .col(
                        ColumnDef::new(Commits::CreatedAtLocal)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commits_repository_id")
                            .from(Commits::Table, Commits::RepositoryId)
                            .to(Repositories::Table, Repositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_commits_repository_sha")
                    .table(Commits::Table)
                    .col(Commits::RepositoryId)
                    .col(Commits::Sha)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Descending commit_date index needs raw SQL; the builder only emits
        // ascending column lists.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_commits_repository_date ON commits (repository_id, commit_date DESC)"
                    .to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commits_author")
                    .table(Commits::Table)
                    .col(Commits::AuthorName)
                    .col(Commits::AuthorEmail)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_commits_repository_sha").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_commits_repository_date").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_commits_author").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Commits::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Commits {
    Table,
    Id,
    RepositoryId,
    Sha,
    Message,
    AuthorName,
    AuthorEmail,
    AuthorDate,
    CommitterName,
    CommitterEmail,
    CommitDate,
    Url,
    CreatedAtLocal,
}

#[derive(DeriveIden)]
enum Repositories {
    Table,
    Id,
}
