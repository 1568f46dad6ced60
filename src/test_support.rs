//! Shared fixtures for unit tests: an in-memory database with the full
//! schema applied and a scriptable stand-in for the GitHub client.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};

use crate::error::UpstreamError;
use crate::github::{
    CommitDetail, CommitIdentity, CommitResponse, RateLimitInfo, RepositoryResponse, Upstream,
};

pub async fn test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("create in-memory db");
    Migrator::up(&db, None).await.expect("apply migrations");
    db
}

pub fn status_error(status: u16) -> UpstreamError {
    UpstreamError::Status {
        url: "https://api.github.com/test".to_string(),
        status,
    }
}

pub fn repository_response() -> RepositoryResponse {
    RepositoryResponse {
        id: 23096959,
        name: "example".to_string(),
        full_name: "golang/example".to_string(),
        description: Some("Go example projects".to_string()),
        html_url: "https://github.com/golang/example".to_string(),
        language: Some("Go".to_string()),
        forks_count: 2300,
        stargazers_count: 7500,
        watchers_count: 7500,
        open_issues_count: 40,
        created_at: "2014-08-18T17:53:24Z".parse().unwrap(),
        updated_at: "2024-01-15T09:00:00Z".parse().unwrap(),
    }
}

pub fn commit_response(i: usize) -> CommitResponse {
    let date = Utc::now() - chrono::Duration::hours(i as i64 + 1);
    CommitResponse {
        sha: format!("{i:040x}"),
        commit: CommitDetail {
            author: CommitIdentity {
                name: "Gopher".to_string(),
                email: "gopher@golang.org".to_string(),
                date,
            },
            committer: CommitIdentity {
                name: "GitHub".to_string(),
                email: "noreply@github.com".to_string(),
                date,
            },
            message: format!("commit {i}"),
        },
        html_url: format!("https://github.com/golang/example/commit/{i:040x}"),
    }
}

/// Scriptable [`Upstream`] variant. Failures are queued per endpoint and
/// consumed one call at a time; once drained, calls succeed with the
/// configured fixtures.
pub struct MockUpstream {
    repository: Mutex<RepositoryResponse>,
    commits: Mutex<Vec<CommitResponse>>,
    repository_failures: Mutex<VecDeque<UpstreamError>>,
    commits_failures: Mutex<VecDeque<UpstreamError>>,
    repository_calls: AtomicUsize,
    commits_calls: AtomicUsize,
    last_since: Mutex<Option<DateTime<Utc>>>,
}

impl MockUpstream {
    pub fn with_commit_count(count: usize) -> Self {
        Self {
            repository: Mutex::new(repository_response()),
            commits: Mutex::new((0..count).map(commit_response).collect()),
            repository_failures: Mutex::new(VecDeque::new()),
            commits_failures: Mutex::new(VecDeque::new()),
            repository_calls: AtomicUsize::new(0),
            commits_calls: AtomicUsize::new(0),
            last_since: Mutex::new(None),
        }
    }

    pub fn set_commits(&self, commits: Vec<CommitResponse>) {
        *self.commits.lock().unwrap() = commits;
    }

    pub fn set_stars(&self, stars: i32) {
        self.repository.lock().unwrap().stargazers_count = stars;
    }

    pub fn push_repository_failure(&self, err: UpstreamError) {
        self.repository_failures.lock().unwrap().push_back(err);
    }

    pub fn push_commits_failure(&self, err: UpstreamError) {
        self.commits_failures.lock().unwrap().push_back(err);
    }

    /// Queues `n` consecutive 500s on the repository endpoint.
    pub fn fail_repository_times(&self, n: usize) {
        for _ in 0..n {
            self.push_repository_failure(status_error(500));
        }
    }

    pub fn repository_calls(&self) -> usize {
        self.repository_calls.load(Ordering::SeqCst)
    }

    pub fn commits_calls(&self) -> usize {
        self.commits_calls.load(Ordering::SeqCst)
    }

    pub fn last_since(&self) -> Option<DateTime<Utc>> {
        *self.last_since.lock().unwrap()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn get_repository(
        &self,
        _owner: &str,
        _name: &str,
    ) -> Result<RepositoryResponse, UpstreamError> {
        self.repository_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.repository_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.repository.lock().unwrap().clone())
    }

    async fn get_commits(
        &self,
        _owner: &str,
        _name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitResponse>, UpstreamError> {
        self.commits_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_since.lock().unwrap() = since;
        if let Some(err) = self.commits_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.commits.lock().unwrap().clone())
    }

    fn rate_limit_info(&self) -> RateLimitInfo {
        RateLimitInfo {
            remaining: 5000,
            limit: 5000,
            reset: Utc::now() + chrono::Duration::hours(1),
        }
    }
}
