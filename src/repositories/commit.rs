//! # Commit store
//!
//! Persistence operations for commit rows, including the author aggregates
//! served by the stats endpoints. Inserting an already-mirrored
//! (repository_id, sha) pair reports a conflict; callers ingesting upstream
//! pages treat that as success.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Alias, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::StoreError;
use crate::models::commit::{ActiveModel, Column, Entity, Model};

/// Field set for inserting a commit row.
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub repository_id: i64,
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: DateTime<Utc>,
    pub committer_name: String,
    pub committer_email: String,
    pub commit_date: DateTime<Utc>,
    pub url: String,
}

/// Per-author commit count, grouped on the (name, email) pair.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AuthorStats {
    pub author_name: String,
    pub author_email: String,
    pub commit_count: i64,
}

pub struct CommitStore;

impl CommitStore {
    pub async fn create<C: ConnectionTrait>(
        conn: &C,
        record: NewCommit,
    ) -> Result<Model, StoreError> {
        let model = ActiveModel {
            repository_id: Set(record.repository_id),
            sha: Set(record.sha),
            message: Set(record.message),
            author_name: Set(record.author_name),
            author_email: Set(record.author_email),
            author_date: Set(record.author_date.into()),
            committer_name: Set(record.committer_name),
            committer_email: Set(record.committer_email),
            commit_date: Set(record.commit_date.into()),
            url: Set(record.url),
            created_at_local: Set(Utc::now().into()),
            ..Default::default()
        };

        model
            .insert(conn)
            .await
            .map_err(|e| StoreError::from_db("create_commit", e))
    }

    pub async fn get_by_sha<C: ConnectionTrait>(
        conn: &C,
        repository_id: i64,
        sha: &str,
    ) -> Result<Option<Model>, StoreError> {
        Entity::find()
            .filter(Column::RepositoryId.eq(repository_id))
            .filter(Column::Sha.eq(sha))
            .one(conn)
            .await
            .map_err(|e| StoreError::from_db("get_commit_by_sha", e))
    }

    /// Commits for one repository, newest first.
    pub async fn get_by_repository<C: ConnectionTrait>(
        conn: &C,
        repository_id: i64,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Model>, StoreError> {
        Entity::find()
            .filter(Column::RepositoryId.eq(repository_id))
            .order_by_desc(Column::CommitDate)
            .limit(limit)
            .offset(offset)
            .all(conn)
            .await
            .map_err(|e| StoreError::from_db("get_commits_by_repository", e))
    }

    pub async fn count_by_repository<C: ConnectionTrait>(
        conn: &C,
        repository_id: i64,
    ) -> Result<u64, StoreError> {
        Entity::find()
            .filter(Column::RepositoryId.eq(repository_id))
            .count(conn)
            .await
            .map_err(|e| StoreError::from_db("count_commits_by_repository", e))
    }

    pub async fn top_authors<C: ConnectionTrait>(
        conn: &C,
        limit: u64,
    ) -> Result<Vec<AuthorStats>, StoreError> {
        Self::author_stats(conn, None, limit).await
    }

    pub async fn top_authors_by_repository<C: ConnectionTrait>(
        conn: &C,
        repository_id: i64,
        limit: u64,
    ) -> Result<Vec<AuthorStats>, StoreError> {
        Self::author_stats(conn, Some(repository_id), limit).await
    }

    async fn author_stats<C: ConnectionTrait>(
        conn: &C,
        repository_id: Option<i64>,
        limit: u64,
    ) -> Result<Vec<AuthorStats>, StoreError> {
        let mut query = Entity::find()
            .select_only()
            .column(Column::AuthorName)
            .column(Column::AuthorEmail)
            .column_as(Column::Id.count(), "commit_count")
            .group_by(Column::AuthorName)
            .group_by(Column::AuthorEmail)
            .order_by_desc(Expr::col(Alias::new("commit_count")))
            .limit(limit);

        if let Some(id) = repository_id {
            query = query.filter(Column::RepositoryId.eq(id));
        }

        let rows = query
            .into_tuple::<(String, String, i64)>()
            .all(conn)
            .await
            .map_err(|e| StoreError::from_db("top_authors", e))?;

        Ok(rows
            .into_iter()
            .map(|(author_name, author_email, commit_count)| AuthorStats {
                author_name,
                author_email,
                commit_count,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::repository::{NewRepository, RepositoryStore};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection};

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        db
    }

    async fn seed_repository(db: &DatabaseConnection, full_name: &str, github_id: i64) -> i64 {
        let (owner, name) = full_name.split_once('/').unwrap();
        RepositoryStore::create(
            db,
            NewRepository {
                github_id,
                name: name.to_string(),
                full_name: full_name.to_string(),
                description: None,
                url: format!("https://github.com/{owner}/{name}"),
                language: Some("Go".to_string()),
                forks_count: 0,
                stars_count: 0,
                open_issues_count: 0,
                watchers_count: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        )
        .await
        .expect("seed repository")
        .id
    }

    fn commit(repository_id: i64, sha: &str, author: &str, minutes_ago: i64) -> NewCommit {
        let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        NewCommit {
            repository_id,
            sha: sha.to_string(),
            message: format!("change {sha}"),
            author_name: author.to_string(),
            author_email: format!("{author}@example.com"),
            author_date: at,
            committer_name: author.to_string(),
            committer_email: format!("{author}@example.com"),
            commit_date: at,
            url: format!("https://github.com/golang/example/commit/{sha}"),
        }
    }

    #[tokio::test]
    async fn create_then_get_by_sha_round_trips() {
        let db = test_db().await;
        let repo_id = seed_repository(&db, "golang/example", 1).await;

        CommitStore::create(&db, commit(repo_id, "abc123", "gopher", 5))
            .await
            .unwrap();

        let row = CommitStore::get_by_sha(&db, repo_id, "abc123")
            .await
            .unwrap()
            .expect("row exists");
        assert_eq!(row.sha, "abc123");
        assert_eq!(row.author_name, "gopher");
        assert_eq!(row.author_email, "gopher@example.com");
        assert_eq!(row.committer_name, "gopher");
        assert_eq!(row.message, "change abc123");
        assert_eq!(
            row.url,
            "https://github.com/golang/example/commit/abc123"
        );
    }

    #[tokio::test]
    async fn duplicate_sha_within_repository_is_conflict() {
        let db = test_db().await;
        let repo_id = seed_repository(&db, "golang/example", 1).await;

        CommitStore::create(&db, commit(repo_id, "abc123", "gopher", 5))
            .await
            .unwrap();
        let err = CommitStore::create(&db, commit(repo_id, "abc123", "gopher", 5))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(CommitStore::count_by_repository(&db, repo_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_sha_in_different_repositories_is_allowed() {
        let db = test_db().await;
        let first = seed_repository(&db, "golang/example", 1).await;
        let second = seed_repository(&db, "golang/tools", 2).await;

        CommitStore::create(&db, commit(first, "abc123", "gopher", 5))
            .await
            .unwrap();
        CommitStore::create(&db, commit(second, "abc123", "gopher", 5))
            .await
            .unwrap();

        assert_eq!(CommitStore::count_by_repository(&db, first).await.unwrap(), 1);
        assert_eq!(CommitStore::count_by_repository(&db, second).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn listing_orders_newest_first_with_pagination() {
        let db = test_db().await;
        let repo_id = seed_repository(&db, "golang/example", 1).await;

        for (i, sha) in ["aaa", "bbb", "ccc"].iter().enumerate() {
            CommitStore::create(&db, commit(repo_id, sha, "gopher", 10 * (i as i64 + 1)))
                .await
                .unwrap();
        }

        let page = CommitStore::get_by_repository(&db, repo_id, 2, 0)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        // "aaa" is the most recent (smallest minutes_ago).
        assert_eq!(page[0].sha, "aaa");
        assert_eq!(page[1].sha, "bbb");

        let rest = CommitStore::get_by_repository(&db, repo_id, 2, 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].sha, "ccc");
    }

    #[tokio::test]
    async fn top_authors_ranks_by_commit_count() {
        let db = test_db().await;
        let repo_id = seed_repository(&db, "golang/example", 1).await;

        for sha in ["a1", "a2", "a3"] {
            CommitStore::create(&db, commit(repo_id, sha, "alice", 5))
                .await
                .unwrap();
        }
        CommitStore::create(&db, commit(repo_id, "b1", "bob", 5))
            .await
            .unwrap();

        let stats = CommitStore::top_authors(&db, 10).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].author_name, "alice");
        assert_eq!(stats[0].commit_count, 3);
        assert_eq!(stats[1].author_name, "bob");
        assert_eq!(stats[1].commit_count, 1);

        let limited = CommitStore::top_authors(&db, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].author_name, "alice");
    }

    #[tokio::test]
    async fn top_authors_by_repository_scopes_the_aggregate() {
        let db = test_db().await;
        let first = seed_repository(&db, "golang/example", 1).await;
        let second = seed_repository(&db, "golang/tools", 2).await;

        CommitStore::create(&db, commit(first, "a1", "alice", 5))
            .await
            .unwrap();
        CommitStore::create(&db, commit(second, "b1", "bob", 5))
            .await
            .unwrap();

        let stats = CommitStore::top_authors_by_repository(&db, first, 10)
            .await
            .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].author_name, "alice");
    }

    #[tokio::test]
    async fn deleting_repository_cascades_to_commits() {
        let db = test_db().await;
        let repo_id = seed_repository(&db, "golang/example", 1).await;

        for sha in ["a", "b", "c", "d", "e"] {
            CommitStore::create(&db, commit(repo_id, sha, "gopher", 5))
                .await
                .unwrap();
        }
        assert_eq!(CommitStore::count_by_repository(&db, repo_id).await.unwrap(), 5);

        RepositoryStore::delete(&db, repo_id).await.unwrap();
        assert_eq!(CommitStore::count_by_repository(&db, repo_id).await.unwrap(), 0);
    }
}
