//! # Jobs API Handlers
//!
//! Observability over the job queue: list all jobs newest-first and fetch
//! one job's status and retry bookkeeping.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::job;
use crate::server::AppState;

/// Queue row as surfaced over the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "resync")]
    pub job_type: String,
    #[schema(example = "pending")]
    pub status: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
    pub error: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_retry_at: Option<String>,
    pub next_retry_at: Option<String>,
}

impl From<job::Model> for JobInfo {
    fn from(model: job::Model) -> Self {
        Self {
            id: model.id.to_string(),
            job_type: model.job_type,
            status: model.status,
            payload: model.payload,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
            error: model.error,
            retry_count: model.retry_count,
            max_retries: model.max_retries,
            last_retry_at: model.last_retry_at.map(|t| t.to_rfc3339()),
            next_retry_at: model.next_retry_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsResponse {
    pub jobs: Vec<JobInfo>,
}

/// All jobs, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    responses(
        (status = 200, description = "All jobs, newest first", body = JobsResponse),
        (status = 500, description = "Internal error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<JobsResponse>, ApiError> {
    let jobs = state.queue.get_jobs().await?;
    Ok(Json(JobsResponse {
        jobs: jobs.into_iter().map(JobInfo::from).collect(),
    }))
}

/// One job by id.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}",
    params(("job_id" = String, Path, description = "Job UUID")),
    responses(
        (status = 200, description = "Job details", body = JobInfo),
        (status = 400, description = "Malformed job id", body = ApiError),
        (status = 404, description = "Unknown job", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobInfo>, ApiError> {
    let id = Uuid::parse_str(&job_id)
        .map_err(|_| ApiError::validation("job_id must be a valid UUID"))?;

    let job = state
        .queue
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    Ok(Json(JobInfo::from(job)))
}
