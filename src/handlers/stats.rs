//! # Statistics API Handlers
//!
//! Author-level aggregates over the mirrored commit history.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::repositories::AuthorStats;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct TopAuthorsQuery {
    pub limit: Option<u64>,
    /// Optional `owner/name` scope; absent means all repositories.
    pub repository: Option<String>,
}

/// Top commit authors, globally or scoped to one repository.
#[utoipa::path(
    get,
    path = "/api/v1/stats/top-authors",
    params(
        ("limit" = Option<u64>, Query, description = "Maximum authors to return (default 10, max 100)"),
        ("repository" = Option<String>, Query, description = "Scope to one owner/name repository")
    ),
    responses(
        (status = 200, description = "Authors ranked by commit count", body = Vec<AuthorStats>),
        (status = 400, description = "Invalid parameters", body = ApiError),
        (status = 404, description = "Unknown repository", body = ApiError)
    ),
    tag = "stats"
)]
pub async fn top_authors(
    State(state): State<AppState>,
    Query(params): Query<TopAuthorsQuery>,
) -> Result<Json<Vec<AuthorStats>>, ApiError> {
    let limit = params.limit.unwrap_or(10);
    if limit == 0 || limit > 100 {
        return Err(ApiError::validation("limit must be between 1 and 100"));
    }

    let stats = match params.repository.as_deref() {
        Some(full_name) => {
            state
                .sync
                .top_authors_by_repository(full_name, limit)
                .await?
        }
        None => state.sync.top_authors(limit).await?,
    };

    Ok(Json(stats))
}
