//! Migration to create the monitored_repositories table.
//!
//! The set of repositories the monitor re-syncs on its own cadence.
//! Removal is a soft delete: rows flip is_active instead of disappearing.

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
                    .table(MonitoredRepositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MonitoredRepositories::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MonitoredRepositories::FullName)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(MonitoredRepositories::LastSyncTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MonitoredRepositories::SyncInterval)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MonitoredRepositories::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(MonitoredRepositories::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MonitoredRepositories::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Partial index: the monitor only ever scans active rows.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_monitored_repositories_active ON monitored_repositories (full_name) WHERE is_active"
                    .to_string(),
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_monitored_repositories_active")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(MonitoredRepositories::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum MonitoredRepositories {
    Table,
    Id,
    FullName,
    LastSyncTime,
    SyncInterval,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
