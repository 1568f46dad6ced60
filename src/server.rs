//! # Server Configuration
//!
//! Axum router assembly, shared application state, and the OpenAPI document.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::queue::JobQueue;
use crate::sync::SyncService;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub sync: Arc<SyncService>,
    pub queue: Arc<JobQueue>,
}

/// Creates and configures the Axum application router.
pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/repositories",
            get(handlers::repositories::list_repositories),
        )
        .route(
            "/repositories/{owner}/{repo}",
            put(handlers::repositories::add_repository)
                .delete(handlers::repositories::remove_repository),
        )
        .route(
            "/repositories/{owner}/{repo}/commits",
            get(handlers::repositories::get_commits),
        )
        .route(
            "/repositories/{owner}/{repo}/sync",
            post(handlers::repositories::resync_repository),
        )
        .route("/stats/top-authors", get(handlers::stats::top_authors))
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/{job_id}", get(handlers::jobs::get_job));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Serves the API until the shutdown token fires.
pub async fn run_server(
    config: &AppConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_app(state);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::repositories::list_repositories,
        crate::handlers::repositories::add_repository,
        crate::handlers::repositories::remove_repository,
        crate::handlers::repositories::get_commits,
        crate::handlers::repositories::resync_repository,
        crate::handlers::stats::top_authors,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::get_job,
    ),
    components(
        schemas(
            crate::error::ApiError,
            crate::handlers::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::repositories::RepositoryInfo,
            crate::handlers::repositories::MonitoredInfo,
            crate::handlers::repositories::CommitInfo,
            crate::handlers::repositories::CommitsResponse,
            crate::handlers::repositories::Pagination,
            crate::handlers::repositories::EnqueuedJob,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobsResponse,
            crate::repositories::AuthorStats,
        )
    ),
    info(
        title = "gitmirror API",
        description = "Mirrors public GitHub repositories into a local relational store",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
