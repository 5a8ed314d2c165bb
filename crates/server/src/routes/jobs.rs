//! Job endpoints: status snapshot and the generation stream.
//!
//! - `GET  /api/jobs/:id`          — job record snapshot (polling readers)
//! - `POST /api/jobs/:id/generate` — start the worker and stream progress
//!   events over SSE until the terminal event closes the connection
//!
//! The generate handler is the stream transport: it commits to streaming
//! mode immediately (headers first, proxy buffering disabled), forwards
//! progress frames in emission order with heartbeat comment frames in
//! between, folds intermediate events into the job record, and tears the
//! worker down when the client disconnects.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::mpsc;

use relive_core::{ProgressEvent, Stage};
use relive_db::{Database, JobRecord, JobStatus};

use crate::error::{ApiError, ApiResult};
use crate::routes::caller_identity;
use crate::session::{JobSession, SessionGuard};
use crate::state::AppState;
use crate::supervisor::{run_worker, SessionMessage};

/// Interval between SSE comment frames. Keeps idle-timeout-happy proxies
/// from dropping the connection between sparse progress events.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Build the jobs sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/generate", post(generate))
}

/// GET /api/jobs/:id — current job record, for pollers.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<JobRecord>> {
    let owner = caller_identity(&headers)?;
    let job = state
        .db
        .get_job(&id)
        .await?
        .ok_or(ApiError::JobNotFound(id))?;
    if job.owner_id != owner {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(job))
}

/// POST /api/jobs/:id/generate — run the worker, streaming progress as SSE.
async fn generate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let owner = caller_identity(&headers)?;
    let job = state
        .db
        .get_job(&id)
        .await?
        .ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    if job.owner_id != owner {
        return Err(ApiError::Forbidden);
    }
    if job.status.is_terminal() {
        return Err(ApiError::Conflict(
            "job already finished; upload again to regenerate".to_string(),
        ));
    }

    // One live worker per job id. A `processing` record without a live
    // session is a leftover from a disconnected client and may re-enter.
    let session = {
        let mut active = state
            .active
            .write()
            .map_err(|e| ApiError::Internal(format!("sessions lock poisoned: {e}")))?;
        if active.contains_key(&id) {
            return Err(ApiError::Conflict(
                "generation already running for this job".to_string(),
            ));
        }
        let session = Arc::new(JobSession::new(&id));
        active.insert(id.clone(), session.clone());
        session
    };
    let guard = SessionGuard::new(state.active.clone(), session.clone());

    // Entering `processing` resets progress to 0.
    state
        .db
        .set_status(&id, JobStatus::Processing, Some("Starting video generation"), 0)
        .await?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_worker(
        state.db.clone(),
        session.clone(),
        state.config.worker(),
        PathBuf::from(&job.input_path),
        state.config.work_dir(&id),
        state.config.videos_dir().join(format!("{id}.mp4")),
        tx,
    ));

    let stream = session_stream(state.db.clone(), session, rx, guard);
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL));
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    ))
}

/// The transport's event loop: forward frames in emission order, fold
/// intermediate events into the record, close after the terminal frame.
fn session_stream(
    db: Database,
    session: Arc<JobSession>,
    mut rx: mpsc::Receiver<SessionMessage>,
    guard: SessionGuard,
) -> impl tokio_stream::Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        // Owned by the stream so that dropping the response — polled or
        // not — cancels the session and removes it from the active map.
        let _guard = guard;
        while let Some(msg) = rx.recv().await {
            match msg {
                SessionMessage::Progress(mut event) => {
                    if event.stage == Stage::Processing {
                        fold_into_record(&db, &session, &mut event).await;
                    }
                    yield Ok(Event::default().data(
                        serde_json::to_string(&event).unwrap_or_default(),
                    ));
                }
                SessionMessage::Terminal(event) => {
                    // The record was finalized before this frame was queued;
                    // deliver it and close the stream.
                    tracing::info!(
                        job_id = %session.job_id,
                        stage = event.stage.as_str(),
                        "terminal event delivered"
                    );
                    yield Ok(Event::default().data(
                        serde_json::to_string(&event).unwrap_or_default(),
                    ));
                    break;
                }
            }
        }
    }
}

/// Fold an intermediate event into the job record: monotonic progress clamp
/// plus last-write-wins message. The clamped value also replaces the frame's
/// progress so stream readers never observe a regression.
async fn fold_into_record(db: &Database, session: &JobSession, event: &mut ProgressEvent) {
    let progress = match event.progress {
        Some(p) => {
            let clamped = session.observe_progress(p);
            event.progress = Some(clamped);
            clamped
        }
        None if event.message.is_none() => return,
        None => session.progress(),
    };
    if let Err(err) = db
        .set_status(&session.job_id, JobStatus::Processing, event.message.as_deref(), progress)
        .await
    {
        tracing::warn!(job_id = %session.job_id, %err, "failed to fold progress into job record");
    }
}
