//! # Repository API Handlers
//!
//! Add/remove monitored repositories, list them, page through mirrored
//! commits, and enqueue resync jobs.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::{commit, monitored_repository, repository};
use crate::queue::{JobType, NewJob, SyncPayload};
use crate::server::AppState;

/// Mirrored repository representation.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RepositoryInfo {
    pub id: i64,
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
    pub created_at: String,
    pub updated_at: String,
    pub last_commit_check: Option<String>,
    pub commits_since: Option<String>,
}

impl From<repository::Model> for RepositoryInfo {
    fn from(model: repository::Model) -> Self {
        Self {
            id: model.id,
            github_id: model.github_id,
            name: model.name,
            full_name: model.full_name,
            description: model.description,
            url: model.url,
            language: model.language,
            forks_count: model.forks_count,
            stars_count: model.stars_count,
            open_issues_count: model.open_issues_count,
            watchers_count: model.watchers_count,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
            last_commit_check: model.last_commit_check.map(|t| t.to_rfc3339()),
            commits_since: model.commits_since.map(|t| t.to_rfc3339()),
        }
    }
}

/// Monitored-set entry.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MonitoredInfo {
    pub full_name: String,
    pub last_sync_time: String,
    pub sync_interval: String,
    pub is_active: bool,
}

impl From<monitored_repository::Model> for MonitoredInfo {
    fn from(model: monitored_repository::Model) -> Self {
        Self {
            full_name: model.full_name,
            last_sync_time: model.last_sync_time.to_rfc3339(),
            sync_interval: model.sync_interval,
            is_active: model.is_active,
        }
    }
}

/// One mirrored commit.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: String,
    pub committer_name: String,
    pub committer_email: String,
    pub commit_date: String,
    pub url: String,
}

impl From<commit::Model> for CommitInfo {
    fn from(model: commit::Model) -> Self {
        Self {
            sha: model.sha,
            message: model.message,
            author_name: model.author_name,
            author_email: model.author_email,
            author_date: model.author_date.to_rfc3339(),
            committer_name: model.committer_name,
            committer_email: model.committer_email,
            commit_date: model.commit_date.to_rfc3339(),
            url: model.url,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
    pub total_items: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommitsResponse {
    pub commits: Vec<CommitInfo>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Acknowledgement for an enqueued background job.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueuedJob {
    pub job_id: String,
    pub job_type: String,
    pub status: String,
}

fn validate_repo_path(owner: &str, repo: &str) -> Result<(), ApiError> {
    if owner.is_empty() || repo.is_empty() || owner.contains('/') || repo.contains('/') {
        return Err(ApiError::validation(
            "Repository identity must be owner/name with exactly one separator",
        ));
    }
    Ok(())
}

/// List the monitored set (active rows only).
#[utoipa::path(
    get,
    path = "/api/v1/repositories",
    responses(
        (status = 200, description = "Active monitored repositories", body = Vec<MonitoredInfo>),
        (status = 500, description = "Internal error", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn list_repositories(
    State(state): State<AppState>,
) -> Result<Json<Vec<MonitoredInfo>>, ApiError> {
    let monitored = state.sync.monitored_repositories().await?;
    Ok(Json(monitored.into_iter().map(MonitoredInfo::from).collect()))
}

/// Register a repository for monitoring and run the initial sync.
#[utoipa::path(
    put,
    path = "/api/v1/repositories/{owner}/{repo}",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 201, description = "Repository mirrored and monitored", body = RepositoryInfo),
        (status = 404, description = "Unknown upstream repository", body = ApiError),
        (status = 429, description = "GitHub rate limit exhausted", body = ApiError),
        (status = 500, description = "Internal error", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn add_repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    validate_repo_path(&owner, &repo)?;

    let repository = state.sync.add_repository(&owner, &repo).await?;
    Ok((
        StatusCode::CREATED,
        Json(RepositoryInfo::from(repository)),
    ))
}

/// Deactivate monitoring for a repository. Mirrored data stays queryable.
#[utoipa::path(
    delete,
    path = "/api/v1/repositories/{owner}/{repo}",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 204, description = "Monitoring deactivated"),
        (status = 404, description = "Repository is not monitored", body = ApiError),
        (status = 500, description = "Internal error", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn remove_repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    validate_repo_path(&owner, &repo)?;

    let full_name = format!("{owner}/{repo}");
    if state.sync.remove_repository(&full_name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Repository is not monitored"))
    }
}

/// Paginated commit listing, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/repositories/{owner}/{repo}/commits",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name"),
        ("page" = Option<u64>, Query, description = "1-based page number (default 1)"),
        ("per_page" = Option<u64>, Query, description = "Page size (default 10, max 100)")
    ),
    responses(
        (status = 200, description = "Commits for the repository", body = CommitsResponse),
        (status = 400, description = "Invalid pagination parameters", body = ApiError),
        (status = 404, description = "Unknown repository", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn get_commits(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<CommitsQuery>,
) -> Result<Json<CommitsResponse>, ApiError> {
    validate_repo_path(&owner, &repo)?;

    let page = params.page.unwrap_or(1);
    let per_page = params.per_page.unwrap_or(10);
    if page == 0 {
        return Err(ApiError::validation("page starts at 1"));
    }
    if per_page == 0 || per_page > 100 {
        return Err(ApiError::validation("per_page must be between 1 and 100"));
    }

    let full_name = format!("{owner}/{repo}");
    let (commits, total_items) = state
        .sync
        .commits_by_repository(&full_name, per_page, (page - 1) * per_page)
        .await?;

    Ok(Json(CommitsResponse {
        commits: commits.into_iter().map(CommitInfo::from).collect(),
        pagination: Pagination {
            page,
            per_page,
            total_items,
        },
    }))
}

/// Enqueue a resync job re-ingesting the trailing week.
#[utoipa::path(
    post,
    path = "/api/v1/repositories/{owner}/{repo}/sync",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 202, description = "Resync job accepted", body = EnqueuedJob),
        (status = 404, description = "Unknown repository", body = ApiError),
        (status = 500, description = "Internal error", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn resync_repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    validate_repo_path(&owner, &repo)?;

    let full_name = format!("{owner}/{repo}");
    if state.sync.repository_by_name(&full_name).await?.is_none() {
        return Err(ApiError::not_found("Repository not found"));
    }

    let payload = serde_json::to_value(SyncPayload {
        owner,
        repo,
    })
    .map_err(|err| {
        tracing::error!(error = ?err, "Failed to encode job payload");
        ApiError::internal("Failed to enqueue job")
    })?;

    let job = state
        .queue
        .enqueue(NewJob::new(JobType::Resync, payload))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueuedJob {
            job_id: job.id.to_string(),
            job_type: job.job_type,
            status: job.status,
        }),
    ))
}
