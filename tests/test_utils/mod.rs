//! Shared helpers for the integration tests: an application state wired to
//! an in-memory database and a wiremock stand-in for the GitHub API.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gitmirror::config::AppConfig;
use gitmirror::github::Client;
use gitmirror::queue::JobQueue;
use gitmirror::server::AppState;
use gitmirror::sync::SyncService;

/// Builds an [`AppState`] whose upstream client talks to `upstream_base`.
pub async fn test_state(upstream_base: &str) -> AppState {
    let config = AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        github_api_base: upstream_base.to_string(),
        ..Default::default()
    };

    let db = Database::connect("sqlite::memory:")
        .await
        .expect("create in-memory db");
    Migrator::up(&db, None).await.expect("apply migrations");

    let github = Arc::new(Client::new(&config));
    let sync = Arc::new(SyncService::new(db.clone(), github, &config));
    let queue = Arc::new(JobQueue::new(db.clone()));

    AppState { db, sync, queue }
}

pub fn repo_json() -> serde_json::Value {
    serde_json::json!({
        "id": 23096959,
        "name": "example",
        "full_name": "golang/example",
        "description": "Go example projects",
        "html_url": "https://github.com/golang/example",
        "language": "Go",
        "forks_count": 2300,
        "stargazers_count": 7500,
        "watchers_count": 7500,
        "open_issues_count": 40,
        "created_at": "2014-08-18T17:53:24Z",
        "updated_at": "2024-01-15T09:00:00Z"
    })
}

pub fn commits_json(count: usize) -> serde_json::Value {
    let commits: Vec<_> = (0..count)
        .map(|i| {
            serde_json::json!({
                "sha": format!("{:040x}", i),
                "commit": {
                    "author": {
                        "name": "Gopher",
                        "email": "gopher@golang.org",
                        "date": "2024-01-10T12:00:00Z"
                    },
                    "committer": {
                        "name": "GitHub",
                        "email": "noreply@github.com",
                        "date": "2024-01-10T12:00:05Z"
                    },
                    "message": format!("commit {}", i)
                },
                "html_url": format!("https://github.com/golang/example/commit/{:040x}", i)
            })
        })
        .collect();
    serde_json::json!(commits)
}

/// Mounts a healthy golang/example upstream: repository metadata plus
/// `commit_count` commits.
pub async fn mount_example_repo(server: &MockServer, commit_count: usize) {
    Mock::given(method("GET"))
        .and(path("/repos/golang/example"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repo_json()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/golang/example/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commits_json(commit_count)))
        .mount(server)
        .await;
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn put(uri: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is JSON")
}
