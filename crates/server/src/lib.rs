// crates/server/src/lib.rs
//! Relive server library.
//!
//! Axum-based HTTP server that accepts GPS track uploads, supervises the
//! external video-generation worker, and streams structured progress events
//! to the client over SSE until a terminal event closes the session.

pub mod config;
pub mod error;
pub mod routes;
pub mod session;
pub mod state;
pub mod supervisor;

pub use config::Config;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::api_routes;
pub use session::{ActiveSessions, JobSession, SessionGuard};
pub use state::AppState;
pub use supervisor::{run_worker, SessionMessage, WorkerConfig, GRACE_WINDOW, WORKER_ARTIFACT_RELPATH};

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, uploads, jobs, generation stream)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use relive_db::Database;
    use tower::ServiceExt;

    async fn test_app() -> (Router, tempfile::TempDir) {
        let db = Database::new_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            port: 0,
            data_dir: dir.path().to_path_buf(),
            db_path: std::path::PathBuf::new(),
            python_bin: "/bin/sh".into(),
            worker_script: dir.path().join("worker.sh"),
        };
        (create_app(AppState::new(db, config)), dir)
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (app, _dir) = test_app().await;
        let (status, body) = get(app, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (app, _dir) = test_app().await;
        let (status, _body) = get(app, "/api/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let (app, _dir) = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let allow_origin = response.headers().get("access-control-allow-origin");
        assert!(allow_origin.is_some());
        assert_eq!(allow_origin.unwrap(), "*");
    }
}
