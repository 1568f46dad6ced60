//! Database migrations for gitmirror.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_03_14_000001_create_repositories;
mod m2026_03_14_000002_create_commits;
mod m2026_03_21_000001_create_monitored_repositories;
mod m2026_04_02_000001_create_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_03_14_000001_create_repositories::Migration),
            Box::new(m2026_03_14_000002_create_commits::Migration),
            Box::new(m2026_03_21_000001_create_monitored_repositories::Migration),
            Box::new(m2026_04_02_000001_create_jobs::Migration),
        ]
    }
}
