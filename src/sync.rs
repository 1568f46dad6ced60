//! # Sync Service
//!
//! The single idempotent ingestion primitive. Every caller (monitor, worker,
//! HTTP API) funnels through [`SyncService::sync_repository`]. The service
//! fetches from the upstream first, then applies everything in one store
//! transaction so readers either see the refreshed repository row together
//! with its new commits or neither. It never retries; retry policy belongs to
//! the coordinators.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::error::{StoreError, SyncError};
use crate::github::Upstream;
use crate::models::{commit, monitored_repository, repository};
use crate::repositories::{
    AuthorStats, CommitStore, MonitoredStore, NewCommit, NewRepository, RepositoryStore,
};

pub struct SyncService {
    db: DatabaseConnection,
    github: Arc<dyn Upstream>,
    /// Cadence written onto newly monitored repositories.
    sync_interval: Duration,
    /// Initial sync window for newly added repositories.
    default_age: Duration,
}

impl SyncService {
    pub fn new(db: DatabaseConnection, github: Arc<dyn Upstream>, config: &AppConfig) -> Self {
        Self {
            db,
            github,
            sync_interval: config.sync_interval(),
            default_age: config.sync_default_age(),
        }
    }

    /// Fetches repository metadata and the commit window starting at `since`
    /// (`None` for the full window the upstream permits) and persists both
    /// atomically. Safe to re-run with the same arguments: the repository
    /// upsert is keyed on the upstream id and commits dedupe on
    /// (repository_id, sha).
    #[instrument(skip_all, fields(owner, name))]
    pub async fn sync_repository(
        &self,
        owner: &str,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<(), SyncError> {
        let fetched = self
            .github
            .get_repository(owner, name)
            .await
            .map_err(|source| SyncError::Upstream {
                owner: owner.to_string(),
                name: name.to_string(),
                source,
            })?;

        let commits = self
            .github
            .get_commits(owner, name, since)
            .await
            .map_err(|source| SyncError::Upstream {
                owner: owner.to_string(),
                name: name.to_string(),
                source,
            })?;

        let record = NewRepository {
            github_id: fetched.id,
            name: fetched.name.clone(),
            full_name: fetched.full_name.clone(),
            description: fetched.description.clone(),
            url: fetched.html_url.clone(),
            language: fetched.language.clone(),
            forks_count: fetched.forks_count,
            stars_count: fetched.stargazers_count,
            open_issues_count: fetched.open_issues_count,
            watchers_count: fetched.watchers_count,
            created_at: fetched.created_at,
            updated_at: fetched.updated_at,
        };

        let repo_err = |op: &'static str| {
            let owner = owner.to_string();
            let name = name.to_string();
            move |source: StoreError| SyncError::Repository {
                owner,
                name,
                op,
                source,
            }
        };

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| repo_err("begin")(StoreError::from_db("begin_sync_transaction", e)))?;

        // Lock the repository row (when present) so concurrent syncs of the
        // same repository serialize on the upsert.
        let existing = RepositoryStore::get_by_name_for_update(&txn, &fetched.full_name)
            .await
            .map_err(repo_err("lookup"))?;

        let repo_id = match existing {
            Some(row) => {
                RepositoryStore::update(&txn, &record)
                    .await
                    .map_err(repo_err("update"))?;
                row.id
            }
            None => {
                RepositoryStore::create(&txn, record)
                    .await
                    .map_err(repo_err("create"))?
                    .id
            }
        };

        let mut inserted = 0_usize;
        for response in &commits {
            let seen = CommitStore::get_by_sha(&txn, repo_id, &response.sha)
                .await
                .map_err(|source| SyncError::Commit {
                    repository_id: repo_id,
                    sha: response.sha.clone(),
                    op: "lookup",
                    source,
                })?;
            if seen.is_some() {
                continue;
            }

            let new_commit = NewCommit {
                repository_id: repo_id,
                sha: response.sha.clone(),
                message: response.commit.message.clone(),
                author_name: response.commit.author.name.clone(),
                author_email: response.commit.author.email.clone(),
                author_date: response.commit.author.date,
                committer_name: response.commit.committer.name.clone(),
                committer_email: response.commit.committer.email.clone(),
                commit_date: response.commit.committer.date,
                url: response.html_url.clone(),
            };

            match CommitStore::create(&txn, new_commit).await {
                Ok(_) => inserted += 1,
                // Lost a race with a concurrent sync; the row is there.
                Err(source) if source.is_conflict() => {}
                Err(source) => {
                    return Err(SyncError::Commit {
                        repository_id: repo_id,
                        sha: response.sha.clone(),
                        op: "create",
                        source,
                    });
                }
            }
        }

        RepositoryStore::update_last_commit_check(&txn, repo_id, Utc::now())
            .await
            .map_err(repo_err("update_last_commit_check"))?;
        RepositoryStore::set_commits_since(&txn, repo_id, since)
            .await
            .map_err(repo_err("set_commits_since"))?;

        txn.commit()
            .await
            .map_err(|e| repo_err("commit")(StoreError::from_db("commit_sync_transaction", e)))?;

        info!(
            owner,
            name,
            fetched = commits.len(),
            inserted,
            "Repository synced"
        );

        Ok(())
    }

    /// Registers a repository for monitoring and performs the initial sync
    /// over the trailing default-age window. A failed initial sync rolls the
    /// registration back and surfaces the error.
    pub async fn add_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<repository::Model, SyncError> {
        let full_name = format!("{owner}/{name}");

        MonitoredStore::add(&self.db, &full_name, self.sync_interval)
            .await
            .map_err(|source| SyncError::Repository {
                owner: owner.to_string(),
                name: name.to_string(),
                op: "add_monitored",
                source,
            })?;

        let since = Utc::now()
            - chrono::Duration::from_std(self.default_age)
                .unwrap_or_else(|_| chrono::Duration::days(7));

        if let Err(err) = self.sync_repository(owner, name, Some(since)).await {
            match MonitoredStore::remove(&self.db, &full_name).await {
                Ok(_) => {}
                Err(cleanup_err) => warn!(
                    full_name,
                    error = ?cleanup_err,
                    "Failed to roll back monitoring registration"
                ),
            }
            return Err(err);
        }

        MonitoredStore::update_sync(&self.db, &full_name, Utc::now())
            .await
            .map_err(|source| SyncError::Repository {
                owner: owner.to_string(),
                name: name.to_string(),
                op: "update_sync",
                source,
            })?;

        RepositoryStore::get_by_name(&self.db, &full_name)
            .await
            .map_err(|source| SyncError::Repository {
                owner: owner.to_string(),
                name: name.to_string(),
                op: "lookup",
                source,
            })?
            .ok_or(SyncError::UnknownRepository { full_name })
    }

    /// Deactivates monitoring. Mirrored data stays queryable. Returns whether
    /// an active registration existed.
    pub async fn remove_repository(&self, full_name: &str) -> Result<bool, SyncError> {
        MonitoredStore::remove(&self.db, full_name)
            .await
            .map_err(|source| self.named_err(full_name, "remove_monitored", source))
    }

    /// Hard-deletes the mirrored repository and, via the cascade, its
    /// commits. Monitoring is deactivated first so the monitor does not
    /// immediately re-mirror it.
    pub async fn delete_repository(&self, full_name: &str) -> Result<(), SyncError> {
        let repo = RepositoryStore::get_by_name(&self.db, full_name)
            .await
            .map_err(|source| self.named_err(full_name, "lookup", source))?
            .ok_or_else(|| SyncError::UnknownRepository {
                full_name: full_name.to_string(),
            })?;

        MonitoredStore::remove(&self.db, full_name)
            .await
            .map_err(|source| self.named_err(full_name, "remove_monitored", source))?;

        RepositoryStore::delete(&self.db, repo.id)
            .await
            .map_err(|source| self.named_err(full_name, "delete", source))
    }

    pub async fn repository_by_name(
        &self,
        full_name: &str,
    ) -> Result<Option<repository::Model>, SyncError> {
        RepositoryStore::get_by_name(&self.db, full_name)
            .await
            .map_err(|source| self.named_err(full_name, "lookup", source))
    }

    pub async fn monitored_repositories(
        &self,
    ) -> Result<Vec<monitored_repository::Model>, SyncError> {
        MonitoredStore::list(&self.db)
            .await
            .map_err(|source| self.named_err("", "list_monitored", source))
    }

    /// Paginated commit listing, newest first, with the total row count.
    pub async fn commits_by_repository(
        &self,
        full_name: &str,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<commit::Model>, u64), SyncError> {
        let repo = self
            .repository_by_name(full_name)
            .await?
            .ok_or_else(|| SyncError::UnknownRepository {
                full_name: full_name.to_string(),
            })?;

        let commits = CommitStore::get_by_repository(&self.db, repo.id, limit, offset)
            .await
            .map_err(|source| SyncError::Commit {
                repository_id: repo.id,
                sha: String::new(),
                op: "list",
                source,
            })?;
        let total = CommitStore::count_by_repository(&self.db, repo.id)
            .await
            .map_err(|source| SyncError::Commit {
                repository_id: repo.id,
                sha: String::new(),
                op: "count",
                source,
            })?;

        Ok((commits, total))
    }

    pub async fn top_authors(&self, limit: u64) -> Result<Vec<AuthorStats>, SyncError> {
        CommitStore::top_authors(&self.db, limit)
            .await
            .map_err(|source| self.named_err("", "top_authors", source))
    }

    pub async fn top_authors_by_repository(
        &self,
        full_name: &str,
        limit: u64,
    ) -> Result<Vec<AuthorStats>, SyncError> {
        let repo = self
            .repository_by_name(full_name)
            .await?
            .ok_or_else(|| SyncError::UnknownRepository {
                full_name: full_name.to_string(),
            })?;

        let stats = CommitStore::top_authors_by_repository(&self.db, repo.id, limit)
            .await
            .map_err(|source| SyncError::Commit {
                repository_id: repo.id,
                sha: String::new(),
                op: "top_authors",
                source,
            })?;

        // A known repository with nothing mirrored yet reads as absence, the
        // same way an unknown repository does.
        if stats.is_empty() {
            return Err(SyncError::NoCommits {
                full_name: full_name.to_string(),
            });
        }

        Ok(stats)
    }

    fn named_err(&self, full_name: &str, op: &'static str, source: StoreError) -> SyncError {
        let (owner, name) = full_name.split_once('/').unwrap_or((full_name, ""));
        SyncError::Repository {
            owner: owner.to_string(),
            name: name.to_string(),
            op,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockUpstream, commit_response, status_error, test_db};

    async fn service_with(mock: Arc<MockUpstream>) -> (SyncService, DatabaseConnection) {
        let db = test_db().await;
        let config = AppConfig::default();
        (SyncService::new(db.clone(), mock, &config), db)
    }

    #[tokio::test]
    async fn initial_sync_persists_repository_and_commits() {
        let mock = Arc::new(MockUpstream::with_commit_count(3));
        let (service, db) = service_with(mock.clone()).await;

        service
            .sync_repository("golang", "example", None)
            .await
            .unwrap();

        let repo = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .expect("repository row");
        assert_eq!(repo.github_id, 23096959);
        assert_eq!(repo.stars_count, 7500);
        assert!(repo.last_commit_check.is_some());
        assert_eq!(repo.commits_since, None);

        let count = CommitStore::count_by_repository(&db, repo.id).await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn resync_is_idempotent() {
        let mock = Arc::new(MockUpstream::with_commit_count(3));
        let (service, db) = service_with(mock.clone()).await;
        let since = Utc::now() - chrono::Duration::days(7);

        for _ in 0..3 {
            service
                .sync_repository("golang", "example", Some(since))
                .await
                .unwrap();
        }

        let repo = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .unwrap();
        let count = CommitStore::count_by_repository(&db, repo.id).await.unwrap();
        assert_eq!(count, 3, "re-ingesting the same window adds no rows");
        assert_eq!(
            repo.commits_since.map(|t| t.timestamp()),
            Some(since.timestamp())
        );
    }

    #[tokio::test]
    async fn full_window_sync_clears_commits_since() {
        let mock = Arc::new(MockUpstream::with_commit_count(2));
        let (service, db) = service_with(mock.clone()).await;
        let since = Utc::now() - chrono::Duration::days(7);

        service
            .sync_repository("golang", "example", Some(since))
            .await
            .unwrap();
        let repo = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .unwrap();
        assert!(repo.commits_since.is_some());

        // A full-window sync has no lower bound; the stale window must not
        // survive it.
        service
            .sync_repository("golang", "example", None)
            .await
            .unwrap();
        let repo = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.commits_since, None);
    }

    #[tokio::test]
    async fn sync_refreshes_existing_repository_row() {
        let mock = Arc::new(MockUpstream::with_commit_count(1));
        let (service, db) = service_with(mock.clone()).await;

        service
            .sync_repository("golang", "example", None)
            .await
            .unwrap();
        mock.set_stars(9000);
        service
            .sync_repository("golang", "example", None)
            .await
            .unwrap();

        let repo = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.stars_count, 9000);

        // Still one repository row: the upsert is keyed on github_id.
        assert_eq!(mock.repository_calls(), 2);
    }

    #[tokio::test]
    async fn upstream_repository_failure_is_wrapped_and_nothing_is_written() {
        let mock = Arc::new(MockUpstream::with_commit_count(3));
        mock.push_repository_failure(status_error(500));
        let (service, db) = service_with(mock.clone()).await;

        let err = service
            .sync_repository("golang", "example", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Upstream { .. }));

        assert!(
            RepositoryStore::get_by_name(&db, "golang/example")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn upstream_commit_failure_leaves_repository_unwritten() {
        let mock = Arc::new(MockUpstream::with_commit_count(3));
        mock.push_commits_failure(status_error(502));
        let (service, db) = service_with(mock.clone()).await;

        let err = service
            .sync_repository("golang", "example", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Upstream { .. }));

        // The fetch order (repository, then commits, then one transaction)
        // means a commit-fetch failure writes nothing at all.
        assert!(
            RepositoryStore::get_by_name(&db, "golang/example")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn new_commits_are_appended_to_existing_history() {
        let mock = Arc::new(MockUpstream::with_commit_count(2));
        let (service, db) = service_with(mock.clone()).await;

        service
            .sync_repository("golang", "example", None)
            .await
            .unwrap();

        mock.set_commits(vec![
            commit_response(0),
            commit_response(1),
            commit_response(2),
        ]);
        service
            .sync_repository("golang", "example", None)
            .await
            .unwrap();

        let repo = RepositoryStore::get_by_name(&db, "golang/example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            CommitStore::count_by_repository(&db, repo.id).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn add_repository_registers_monitoring_and_syncs_a_week() {
        let mock = Arc::new(MockUpstream::with_commit_count(3));
        let (service, db) = service_with(mock.clone()).await;
        let before = Utc::now();

        let repo = service.add_repository("golang", "example").await.unwrap();
        assert_eq!(repo.full_name, "golang/example");

        let monitored = MonitoredStore::list(&db).await.unwrap();
        assert_eq!(monitored.len(), 1);
        assert!(monitored[0].is_active);
        assert!(monitored[0].last_sync_time.timestamp() >= before.timestamp());

        // Initial window is the trailing default age (7 days).
        let since = mock.last_since().expect("since was passed");
        let age = before - since;
        assert!((age.num_days() - 7).abs() <= 1, "window: {age}");
    }

    #[tokio::test]
    async fn failed_add_rolls_back_monitoring() {
        let mock = Arc::new(MockUpstream::with_commit_count(0));
        mock.push_repository_failure(status_error(404));
        let (service, db) = service_with(mock.clone()).await;

        let err = service.add_repository("golang", "missing").await.unwrap_err();
        assert!(err.is_not_found());

        assert!(MonitoredStore::list(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_repository_cascades_and_stops_monitoring() {
        let mock = Arc::new(MockUpstream::with_commit_count(5));
        let (service, db) = service_with(mock.clone()).await;

        service.add_repository("golang", "example").await.unwrap();
        service.delete_repository("golang/example").await.unwrap();

        assert!(
            RepositoryStore::get_by_name(&db, "golang/example")
                .await
                .unwrap()
                .is_none()
        );
        assert!(MonitoredStore::list(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_listing_requires_known_repository() {
        let mock = Arc::new(MockUpstream::with_commit_count(0));
        let (service, _db) = service_with(mock).await;

        let err = service
            .commits_by_repository("golang/missing", 10, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownRepository { .. }));
    }

    #[tokio::test]
    async fn scoped_top_authors_require_mirrored_commits() {
        let mock = Arc::new(MockUpstream::with_commit_count(0));
        let (service, _db) = service_with(mock.clone()).await;

        // Known repository, but nothing mirrored for it yet.
        service
            .sync_repository("golang", "example", None)
            .await
            .unwrap();

        let err = service
            .top_authors_by_repository("golang/example", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoCommits { .. }));
        assert!(err.is_not_found());

        // The global aggregate stays a plain empty list.
        assert!(service.top_authors(10).await.unwrap().is_empty());
    }
}
