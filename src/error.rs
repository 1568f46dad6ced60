//! # Error Handling
//!
//! Domain error taxonomy for the sync engine plus the unified HTTP error
//! response. Retry policy lives with the coordinators: nothing in this module
//! (or in the client, store, or sync service that produce these errors)
//! retries on its own.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use sea_orm::{DbErr, RuntimeErr};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Errors from the GitHub client. Carries the failing request so operators
/// can correlate with upstream status pages.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("github request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("github returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("decoding github response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("github rate limit exhausted, resets at {reset}")]
    RateLimited { reset: DateTime<Utc> },

    #[error("building github request URL: {0}")]
    Url(#[from] url::ParseError),
}

impl UpstreamError {
    /// Status code of the upstream reply, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from the persistence layer. Absent rows are `Ok(None)` at the
/// operation surface; `NotFound` is reserved for writes that matched nothing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation {op} failed: {source}")]
    Db {
        op: &'static str,
        #[source]
        source: DbErr,
    },

    #[error("store operation {op} hit a unique constraint")]
    Conflict { op: &'static str },

    #[error("store operation {op} matched no rows")]
    NotFound { op: &'static str },
}

impl StoreError {
    /// Wraps a driver error, classifying unique violations as conflicts so
    /// callers can treat duplicate-insert races as success.
    pub fn from_db(op: &'static str, source: DbErr) -> Self {
        if is_unique_violation(&source) {
            StoreError::Conflict { op }
        } else {
            StoreError::Db { op, source }
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// True when the driver error is a unique-constraint violation
/// (Postgres 23505, SQLite 2067).
pub fn is_unique_violation(err: &DbErr) -> bool {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(sea_orm::SqlxError::Database(db_err)))
        | DbErr::Query(RuntimeErr::SqlxError(sea_orm::SqlxError::Database(db_err))) => {
            matches!(db_err.code().as_deref(), Some("23505") | Some("2067"))
        }
        DbErr::RecordNotInserted => true,
        _ => false,
    }
}

/// Errors surfaced by the sync service, scoped to the identities involved.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching {owner}/{name} from github: {source}")]
    Upstream {
        owner: String,
        name: String,
        #[source]
        source: UpstreamError,
    },

    #[error("repository {op} for {owner}/{name}: {source}")]
    Repository {
        owner: String,
        name: String,
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("commit {op} for repository {repository_id} sha {sha}: {source}")]
    Commit {
        repository_id: i64,
        sha: String,
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("repository not found: {full_name}")]
    UnknownRepository { full_name: String },

    #[error("no commits found for repository: {full_name}")]
    NoCommits { full_name: String },
}

impl SyncError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            SyncError::Upstream {
                source: UpstreamError::RateLimited { .. },
                ..
            }
        )
    }

    /// True for a clean absence: the repository is unknown locally, has no
    /// mirrored commits, or upstream says 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::UnknownRepository { .. } | SyncError::NoCommits { .. } => true,
            SyncError::Upstream { source, .. } => source.status() == Some(404),
            _ => false,
        }
    }
}

/// Unified API error response structure.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    #[schema(value_type = u16)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Suggested retry delay in seconds (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn internal(message: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            message,
        )
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn validation(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        tracing::error!(error = ?err, "Sync operation failed");

        if err.is_rate_limited() {
            let retry_after = match &err {
                SyncError::Upstream {
                    source: UpstreamError::RateLimited { reset },
                    ..
                } => (*reset - Utc::now()).num_seconds().max(0) as u64,
                _ => 60,
            };
            return ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "GitHub rate limit exhausted",
            )
            .with_retry_after(retry_after);
        }

        if err.is_not_found() {
            return match &err {
                SyncError::NoCommits { full_name } => {
                    ApiError::not_found(&format!("No commits found for repository {full_name}"))
                }
                _ => ApiError::not_found("Repository not found"),
            };
        }

        // The wrapped cause stays in the logs; responses carry a generic
        // message.
        ApiError::internal("Repository sync failed")
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = ?err, "Store operation failed");
        match err {
            StoreError::NotFound { .. } => ApiError::not_found("Resource not found"),
            StoreError::Conflict { .. } => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists")
            }
            StoreError::Db { .. } => ApiError::internal("Database operation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn rate_limit_maps_to_429_with_retry_after() {
        let err = SyncError::Upstream {
            owner: "golang".to_string(),
            name: "example".to_string(),
            source: UpstreamError::RateLimited {
                reset: Utc::now() + Duration::seconds(120),
            },
        };
        let api: ApiError = err.into();

        assert_eq!(api.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(api.code, "RATE_LIMITED");
        assert!(api.retry_after.unwrap_or(0) > 0);
    }

    #[test]
    fn upstream_404_maps_to_not_found() {
        let err = SyncError::Upstream {
            owner: "golang".to_string(),
            name: "missing".to_string(),
            source: UpstreamError::Status {
                url: "https://api.github.com/repos/golang/missing".to_string(),
                status: 404,
            },
        };
        let api: ApiError = err.into();

        assert_eq!(api.status, StatusCode::NOT_FOUND);
        assert_eq!(api.code, "NOT_FOUND");
    }

    #[test]
    fn no_commits_maps_to_not_found() {
        let err = SyncError::NoCommits {
            full_name: "golang/example".to_string(),
        };
        let api: ApiError = err.into();

        assert_eq!(api.status, StatusCode::NOT_FOUND);
        assert_eq!(api.code, "NOT_FOUND");
        assert!(api.message.contains("golang/example"));
    }

    #[test]
    fn store_failures_are_redacted() {
        let err = SyncError::Repository {
            owner: "golang".to_string(),
            name: "example".to_string(),
            op: "create",
            source: StoreError::Db {
                op: "create",
                source: DbErr::Custom("password=hunter2".to_string()),
            },
        };
        let api: ApiError = err.into();

        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.message.contains("hunter2"));
    }

    #[test]
    fn problem_json_content_type() {
        let response = ApiError::validation("bad page").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn retry_after_header_is_set() {
        let response = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Rate limit exceeded",
        )
        .with_retry_after(60)
        .into_response();

        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
    }

    #[test]
    fn record_not_inserted_is_conflict() {
        let err = StoreError::from_db("create_commit", DbErr::RecordNotInserted);
        assert!(err.is_conflict());
    }
}
