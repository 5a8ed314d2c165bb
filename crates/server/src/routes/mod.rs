//! API route handlers for the relive server.

pub mod health;
pub mod jobs;
pub mod uploads;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;

use crate::error::ApiError;
use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health             - Health check
/// - POST /api/uploads            - Accept a GPS track upload, create a pending job
/// - GET  /api/jobs/:id           - Job record snapshot (polling)
/// - POST /api/jobs/:id/generate  - Start generation, stream progress as SSE
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", uploads::router())
        .nest("/api", jobs::router())
        .with_state(state)
}

/// Caller identity, resolved upstream and forwarded as `x-user-id`.
///
/// Authentication itself is out of scope here: the deployment fronts this
/// service with an auth layer that verifies credentials and injects the
/// header. A request without it never passed that layer.
pub fn caller_identity(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("missing x-user-id header".to_string()))
}
