//! # Repository store
//!
//! Persistence operations for mirrored repository rows. Creation and update
//! are keyed the way the upstream keys them: update matches on github_id,
//! lookup on the canonical full_name.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, Set,
};

use crate::error::StoreError;
use crate::models::repository::{ActiveModel, Column, Entity, Model};

/// Field set for inserting or refreshing a repository row.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub github_id: i64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub url: String,
    pub language: Option<String>,
    pub forks_count: i32,
    pub stars_count: i32,
    pub open_issues_count: i32,
    pub watchers_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct RepositoryStore;

impl RepositoryStore {
    pub async fn create<C: ConnectionTrait>(
        conn: &C,
        record: NewRepository,
    ) -> Result<Model, StoreError> {
        let now = Utc::now();
        let model = ActiveModel {
            github_id: Set(record.github_id),
            name: Set(record.name),
            full_name: Set(record.full_name),
            description: Set(record.description),
            url: Set(record.url),
            language: Set(record.language),
            forks_count: Set(record.forks_count),
            stars_count: Set(record.stars_count),
            open_issues_count: Set(record.open_issues_count),
            watchers_count: Set(record.watchers_count),
            created_at: Set(record.created_at.into()),
            updated_at: Set(record.updated_at.into()),
            last_commit_check: Set(None),
            commits_since: Set(None),
            created_at_local: Set(now.into()),
            updated_at_local: Set(now.into()),
            ..Default::default()
        };

        model
            .insert(conn)
            .await
            .map_err(|e| StoreError::from_db("create_repository", e))
    }

    /// Refreshes the mutable attributes of the row matching
    /// `record.github_id`.
    pub async fn update<C: ConnectionTrait>(
        conn: &C,
        record: &NewRepository,
    ) -> Result<(), StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::Name, Expr::value(record.name.clone()))
            .col_expr(Column::Description, Expr::value(record.description.clone()))
            .col_expr(Column::Url, Expr::value(record.url.clone()))
            .col_expr(Column::Language, Expr::value(record.language.clone()))
            .col_expr(Column::ForksCount, Expr::value(record.forks_count))
            .col_expr(Column::StarsCount, Expr::value(record.stars_count))
            .col_expr(
                Column::OpenIssuesCount,
                Expr::value(record.open_issues_count),
            )
            .col_expr(Column::WatchersCount, Expr::value(record.watchers_count))
            .col_expr(Column::UpdatedAt, Expr::value(record.updated_at))
            .col_expr(Column::UpdatedAtLocal, Expr::value(Utc::now()))
            .filter(Column::GithubId.eq(record.github_id))
            .exec(conn)
            .await
            .map_err(|e| StoreError::from_db("update_repository", e))?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound {
                op: "update_repository",
            });
        }

        Ok(())
    }

    pub async fn get_by_name<C: ConnectionTrait>(
        conn: &C,
        full_name: &str,
    ) -> Result<Option<Model>, StoreError> {
        Entity::find()
            .filter(Column::FullName.eq(full_name))
            .one(conn)
            .await
            .map_err(|e| StoreError::from_db("get_repository_by_name", e))
    }

    /// Same as [`Self::get_by_name`] but takes a row-level update lock, so a
    /// transactional upsert serializes with concurrent syncs of the same
    /// repository.
    pub async fn get_by_name_for_update<C: ConnectionTrait>(
        conn: &C,
        full_name: &str,
    ) -> Result<Option<Model>, StoreError> {
        Entity::find()
            .filter(Column::FullName.eq(full_name))
            .lock(LockType::Update)
            .one(conn)
            .await
            .map_err(|e| StoreError::from_db("get_repository_by_name", e))
    }

    /// Deletes the repository row; commits go with it via the cascade.
    pub async fn delete<C: ConnectionTrait>(conn: &C, id: i64) -> Result<(), StoreError> {
        let result = Entity::delete_by_id(id)
            .exec(conn)
            .await
            .map_err(|e| StoreError::from_db("delete_repository", e))?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound {
                op: "delete_repository",
            });
        }

        Ok(())
    }

    pub async fn update_last_commit_check<C: ConnectionTrait>(
        conn: &C,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Entity::update_many()
            .col_expr(Column::LastCommitCheck, Expr::value(at))
            .filter(Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| StoreError::from_db("update_last_commit_check", e))?;

        Ok(())
    }

    /// Records the lower bound of the last successful fetch window; `None`
    /// means the fetch had no lower bound and clears the column.
    pub async fn set_commits_since<C: ConnectionTrait>(
        conn: &C,
        id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        Entity::update_many()
            .col_expr(Column::CommitsSince, Expr::value(since))
            .filter(Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| StoreError::from_db("set_commits_since", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection};

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        db
    }

    fn example_record() -> NewRepository {
        NewRepository {
            github_id: 23096959,
            name: "example".to_string(),
            full_name: "golang/example".to_string(),
            description: Some("Go example projects".to_string()),
            url: "https://github.com/golang/example".to_string(),
            language: Some("Go".to_string()),
            forks_count: 2300,
            stars_count: 7500,
            open_issues_count: 40,
            watchers_count: 7500,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_get_by_name_round_trips() {
        let db = test_db().await;
        let created = RepositoryStore::create(&db, example_record()).await.unwrap();

        let fetched = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .expect("row exists");

        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.github_id, 23096959);
        assert_eq!(fetched.name, "example");
        assert_eq!(fetched.description.as_deref(), Some("Go example projects"));
        assert_eq!(fetched.language.as_deref(), Some("Go"));
        assert_eq!(fetched.stars_count, 7500);
        assert_eq!(fetched.last_commit_check, None);
        assert_eq!(fetched.commits_since, None);
    }

    #[tokio::test]
    async fn get_by_name_absent_is_none() {
        let db = test_db().await;
        let fetched = RepositoryStore::get_by_name(&db, "golang/missing")
            .await
            .unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn duplicate_github_id_is_conflict() {
        let db = test_db().await;
        RepositoryStore::create(&db, example_record()).await.unwrap();

        let mut dup = example_record();
        dup.full_name = "golang/example-fork".to_string();
        let err = RepositoryStore::create(&db, dup).await.unwrap_err();

        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_refreshes_counts_by_github_id() {
        let db = test_db().await;
        RepositoryStore::create(&db, example_record()).await.unwrap();

        let mut refreshed = example_record();
        refreshed.stars_count = 7600;
        refreshed.description = None;
        RepositoryStore::update(&db, &refreshed).await.unwrap();

        let row = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.stars_count, 7600);
        assert_eq!(row.description, None);
    }

    #[tokio::test]
    async fn update_unknown_github_id_is_not_found() {
        let db = test_db().await;
        let err = RepositoryStore::update(&db, &example_record())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn bookkeeping_timestamps_are_persisted() {
        let db = test_db().await;
        let created = RepositoryStore::create(&db, example_record()).await.unwrap();

        let checked = Utc::now();
        let since = checked - chrono::Duration::days(7);
        RepositoryStore::update_last_commit_check(&db, created.id, checked)
            .await
            .unwrap();
        RepositoryStore::set_commits_since(&db, created.id, Some(since))
            .await
            .unwrap();

        let row = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            row.last_commit_check.map(|t| t.timestamp()),
            Some(checked.timestamp())
        );
        assert_eq!(
            row.commits_since.map(|t| t.timestamp()),
            Some(since.timestamp())
        );

        // A fetch with no lower bound clears the column.
        RepositoryStore::set_commits_since(&db, created.id, None)
            .await
            .unwrap();
        let row = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.commits_since, None);
    }
}
