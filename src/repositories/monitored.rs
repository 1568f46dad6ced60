//! # Monitored-repository store
//!
//! The monitor's work list. Adding is an upsert that reactivates soft-deleted
//! rows; removing flips is_active and keeps the row (and its cadence
//! history) around.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::error::StoreError;
use crate::models::monitored_repository::{ActiveModel, Column, Entity, Model, format_interval};

pub struct MonitoredStore;

impl MonitoredStore {
    /// Registers `full_name` for monitoring. Re-adding an existing row
    /// refreshes its cadence and reactivates it without touching
    /// last_sync_time.
    pub async fn add<C: ConnectionTrait>(
        conn: &C,
        full_name: &str,
        interval: Duration,
    ) -> Result<Model, StoreError> {
        let now = Utc::now();
        let model = ActiveModel {
            full_name: Set(full_name.to_string()),
            last_sync_time: Set(now.into()),
            sync_interval: Set(format_interval(interval)),
            is_active: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };

        Entity::insert(model)
            .on_conflict(
                OnConflict::column(Column::FullName)
                    .update_columns([Column::SyncInterval, Column::IsActive, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| StoreError::from_db("add_monitored_repository", e))?;

        Entity::find()
            .filter(Column::FullName.eq(full_name))
            .one(conn)
            .await
            .map_err(|e| StoreError::from_db("add_monitored_repository", e))?
            .ok_or(StoreError::NotFound {
                op: "add_monitored_repository",
            })
    }

    /// Active rows only, in registration order.
    pub async fn list<C: ConnectionTrait>(conn: &C) -> Result<Vec<Model>, StoreError> {
        Entity::find()
            .filter(Column::IsActive.eq(true))
            .order_by_asc(Column::Id)
            .all(conn)
            .await
            .map_err(|e| StoreError::from_db("list_monitored_repositories", e))
    }

    pub async fn update_sync<C: ConnectionTrait>(
        conn: &C,
        full_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::LastSyncTime, Expr::value(at))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::FullName.eq(full_name))
            .exec(conn)
            .await
            .map_err(|e| StoreError::from_db("update_monitored_sync", e))?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound {
                op: "update_monitored_sync",
            });
        }

        Ok(())
    }

    /// Soft delete. Returns whether a row was deactivated.
    pub async fn remove<C: ConnectionTrait>(
        conn: &C,
        full_name: &str,
    ) -> Result<bool, StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::IsActive, Expr::value(false))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::FullName.eq(full_name))
            .filter(Column::IsActive.eq(true))
            .exec(conn)
            .await
            .map_err(|e| StoreError::from_db("remove_monitored_repository", e))?;

        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection, PaginatorTrait};

    const HOUR: Duration = Duration::from_secs(3600);

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        db
    }

    #[tokio::test]
    async fn add_lists_and_remove_soft_deletes() {
        let db = test_db().await;

        let row = MonitoredStore::add(&db, "golang/example", HOUR).await.unwrap();
        assert!(row.is_active);
        assert_eq!(row.sync_interval, "3600s");

        let listed = MonitoredStore::list(&db).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].full_name, "golang/example");

        assert!(MonitoredStore::remove(&db, "golang/example").await.unwrap());
        assert!(MonitoredStore::list(&db).await.unwrap().is_empty());

        // Soft delete: the row is still there, just inactive.
        let total = Entity::find().count(&db).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn re_adding_reactivates_without_duplicating() {
        let db = test_db().await;

        MonitoredStore::add(&db, "golang/example", HOUR).await.unwrap();
        MonitoredStore::remove(&db, "golang/example").await.unwrap();

        let row = MonitoredStore::add(&db, "golang/example", Duration::from_secs(7200))
            .await
            .unwrap();
        assert!(row.is_active);
        assert_eq!(row.sync_interval, "7200s");

        let total = Entity::find().count(&db).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn remove_unknown_is_false_not_error() {
        let db = test_db().await;
        assert!(!MonitoredStore::remove(&db, "golang/missing").await.unwrap());
    }

    #[tokio::test]
    async fn update_sync_advances_last_sync_time() {
        let db = test_db().await;
        MonitoredStore::add(&db, "golang/example", HOUR).await.unwrap();

        let later = Utc::now() + chrono::Duration::minutes(30);
        MonitoredStore::update_sync(&db, "golang/example", later)
            .await
            .unwrap();

        let listed = MonitoredStore::list(&db).await.unwrap();
        assert_eq!(listed[0].last_sync_time.timestamp(), later.timestamp());
    }

    #[tokio::test]
    async fn update_sync_unknown_is_not_found() {
        let db = test_db().await;
        let err = MonitoredStore::update_sync(&db, "golang/missing", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
