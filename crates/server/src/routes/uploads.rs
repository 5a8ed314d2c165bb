//! Upload intake.
//!
//! - `POST /api/uploads` — accept a GPS track file, store it, create a
//!   pending job owned by the caller.
//!
//! Listing, downloading, and deleting uploads live in the management
//! service in front of this one; generation only needs the intake path.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use uuid::Uuid;

use relive_db::JobRecord;

use crate::error::{ApiError, ApiResult};
use crate::routes::caller_identity;
use crate::state::AppState;

/// Upload size cap. GPS exports run a few MB; this leaves generous headroom.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Build the uploads sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/uploads", post(upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// POST /api/uploads — multipart upload with a single `file` field.
async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    let owner = caller_identity(&headers)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "upload.dat".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(format!("failed to read upload: {err}")))?;
        if data.is_empty() {
            return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let uploads_dir = state.config.uploads_dir();
        tokio::fs::create_dir_all(&uploads_dir)
            .await
            .map_err(|err| ApiError::Internal(format!("failed to create uploads dir: {err}")))?;
        let stored = uploads_dir.join(format!("{id}-{file_name}"));
        tokio::fs::write(&stored, &data)
            .await
            .map_err(|err| ApiError::Internal(format!("failed to store upload: {err}")))?;

        let job = JobRecord::pending(&id, &owner, &file_name, stored.display().to_string());
        state.db.insert_job(&job).await?;

        tracing::info!(
            job_id = %id,
            owner = %owner,
            file = %file_name,
            bytes = data.len(),
            "upload accepted"
        );
        return Ok((StatusCode::CREATED, Json(job)));
    }

    Err(ApiError::BadRequest("multipart field 'file' is required".to_string()))
}

/// Keep the original name readable but never let it escape the uploads dir.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
