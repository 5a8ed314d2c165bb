// crates/server/src/supervisor.rs
//! Worker process supervision.
//!
//! Owns exactly one worker process per session: spawn, stdout/stderr
//! consumption, graceful cancellation (SIGTERM, 2 s grace, then SIGKILL),
//! artifact verification, and construction of the session's single terminal
//! outcome. Progress frames flow to the transport through an mpsc channel;
//! the terminal record write happens here, before the terminal frame is
//! queued, so a status poll can never contradict a delivered terminal event.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use relive_core::{is_benign_stderr, LineAssembler, ProgressEvent, ProgressTranslator, Stage, WorkerError};
use relive_db::{Database, JobStatus};

use crate::session::JobSession;

/// How long a cancelled worker gets to exit on SIGTERM before SIGKILL.
pub const GRACE_WINDOW: Duration = Duration::from_secs(2);

/// Well-known path of the worker's output inside its output directory.
pub const WORKER_ARTIFACT_RELPATH: &str = "videos/relive_full_quality.mp4";

/// Cap on accumulated stderr kept in memory.
const STDERR_CAP: usize = 16 * 1024;

/// Characters of stderr included in a terminal error message.
const STDERR_TAIL_CHARS: usize = 200;

/// How the supervisor invokes the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub python_bin: String,
    pub script: PathBuf,
}

/// Messages from the supervisor to the SSE transport.
#[derive(Debug)]
pub enum SessionMessage {
    /// An intermediate (or worker-diagnostic) progress frame.
    Progress(ProgressEvent),
    /// The single terminal frame; the job record is already updated when
    /// this is sent.
    Terminal(ProgressEvent),
}

/// Run one supervision session to completion.
///
/// Every exit path either delivers exactly one terminal outcome (store
/// write + terminal frame) or, when the session was cancelled mid-run,
/// leaves the record at its last genuine progress without a terminal write.
pub async fn run_worker(
    db: Database,
    session: Arc<JobSession>,
    config: WorkerConfig,
    input: PathBuf,
    work_dir: PathBuf,
    artifact_dest: PathBuf,
    tx: mpsc::Sender<SessionMessage>,
) {
    if !input.is_file() {
        fail(&db, &session, &tx, &WorkerError::InputMissing { path: input }).await;
        return;
    }
    if !config.script.is_file() {
        fail(
            &db,
            &session,
            &tx,
            &WorkerError::WorkerUnavailable { path: config.script.clone() },
        )
        .await;
        return;
    }
    if let Err(source) = tokio::fs::create_dir_all(&work_dir).await {
        fail(&db, &session, &tx, &WorkerError::SpawnFailed { source }).await;
        return;
    }

    let mut cmd = Command::new(&config.python_bin);
    cmd.arg(&config.script)
        .arg(&input)
        .arg(&work_dir)
        .env("PYTHONUNBUFFERED", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            fail(&db, &session, &tx, &WorkerError::SpawnFailed { source }).await;
            return;
        }
    };
    tracing::info!(job_id = %session.job_id, pid = ?child.id(), "worker spawned");

    let stderr_task = spawn_stderr_reader(child.stderr.take(), tx.clone(), session.job_id.clone());

    let cancel = session.cancel_token();
    let mut cancelled = false;
    let mut translator = ProgressTranslator::new();
    let mut success_message: Option<String> = None;

    if let Some(mut stdout) = child.stdout.take() {
        let mut buf = BytesMut::with_capacity(8 * 1024);
        loop {
            buf.clear();
            tokio::select! {
                read = stdout.read_buf(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        for event in translator.push_chunk(&buf) {
                            forward_event(&tx, &mut success_message, event).await;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(job_id = %session.job_id, %err, "error reading worker stdout");
                        break;
                    }
                },
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    terminate(&mut child, &session.job_id).await;
                }
            }
        }
        for event in translator.finish() {
            forward_event(&tx, &mut success_message, event).await;
        }
    }

    let wait_result = tokio::select! {
        res = child.wait() => Some(res),
        _ = cancel.cancelled(), if !cancelled => None,
    };
    let wait_result = match wait_result {
        Some(res) => res,
        None => {
            cancelled = true;
            terminate(&mut child, &session.job_id).await;
            child.wait().await
        }
    };
    let status = match wait_result {
        Ok(status) => Some(status),
        Err(err) => {
            tracing::error!(job_id = %session.job_id, %err, "failed to reap worker");
            None
        }
    };

    let stderr_text = stderr_task.await.unwrap_or_default();
    let produced = work_dir.join(WORKER_ARTIFACT_RELPATH);
    let exited_ok = status.as_ref().map(|s| s.success()).unwrap_or(false);

    if exited_ok && produced.is_file() {
        // Even a cancelled session takes this path if the worker finished
        // first: the artifact is real, so the completion is recorded.
        if let Some(parent) = artifact_dest.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(job_id = %session.job_id, %err, "failed to create videos dir");
            }
        }
        match tokio::fs::rename(&produced, &artifact_dest).await {
            Ok(()) => {
                let event = ProgressEvent {
                    stage: Stage::Success,
                    progress: Some(100),
                    message: success_message
                        .or_else(|| Some("Video generated successfully!".to_string())),
                    detail: Some(artifact_dest.display().to_string()),
                    ..ProgressEvent::default()
                };
                finalize(&db, &session, &tx, JobStatus::Success, event, Some(&artifact_dest)).await;
                tracing::info!(
                    job_id = %session.job_id,
                    artifact = %artifact_dest.display(),
                    "generation complete"
                );
            }
            Err(err) => {
                tracing::error!(
                    job_id = %session.job_id,
                    from = %produced.display(),
                    to = %artifact_dest.display(),
                    %err,
                    "failed to move artifact"
                );
                let event = ProgressEvent {
                    stage: Stage::Error,
                    progress: Some(session.progress()),
                    message: Some(format!("failed to store artifact: {err}")),
                    ..ProgressEvent::default()
                };
                finalize(&db, &session, &tx, JobStatus::Error, event, None).await;
            }
        }
    } else if cancelled {
        // Client went away and the worker was torn down mid-run. The record
        // keeps its last genuine progress; no terminal write.
        tracing::info!(
            job_id = %session.job_id,
            progress = session.progress(),
            "worker cancelled before completion"
        );
    } else if exited_ok {
        fail(&db, &session, &tx, &WorkerError::ArtifactMissing { path: produced }).await;
    } else {
        let code = status
            .as_ref()
            .map(describe_exit)
            .unwrap_or_else(|| "unknown termination".to_string());
        tracing::warn!(
            job_id = %session.job_id,
            %code,
            stdout_tail = ?translator.tail(),
            "worker failed"
        );
        fail(
            &db,
            &session,
            &tx,
            &WorkerError::ExitedNonZero {
                code,
                stderr_tail: tail_chars(&stderr_text, STDERR_TAIL_CHARS),
            },
        )
        .await;
    }
}

/// Forward one translated stdout event to the transport.
///
/// The worker's own success line is advisory only — the artifact check
/// decides the real outcome — so it is demoted to an intermediate frame and
/// its message is kept for the verified terminal event.
async fn forward_event(
    tx: &mpsc::Sender<SessionMessage>,
    success_message: &mut Option<String>,
    event: ProgressEvent,
) {
    let event = if event.stage == Stage::Success {
        if event.message.is_some() {
            *success_message = event.message.clone();
        }
        ProgressEvent { stage: Stage::Processing, ..event }
    } else {
        event
    };
    // Send failure means the client is gone; progress frames are best-effort.
    let _ = tx.send(SessionMessage::Progress(event)).await;
}

/// SIGTERM, wait out the grace window, then SIGKILL.
async fn terminate(child: &mut Child, job_id: &str) {
    let Some(pid) = child.id() else {
        return; // already exited
    };
    tracing::info!(job_id, pid, "terminating worker");
    if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::warn!(job_id, pid, %err, "failed to send SIGTERM");
    }
    if tokio::time::timeout(GRACE_WINDOW, child.wait()).await.is_err() {
        tracing::warn!(job_id, pid, "worker ignored SIGTERM; escalating to SIGKILL");
        if let Err(err) = child.kill().await {
            tracing::warn!(job_id, pid, %err, "SIGKILL failed");
        }
    }
}

/// Deliver an error terminal outcome.
async fn fail(
    db: &Database,
    session: &JobSession,
    tx: &mpsc::Sender<SessionMessage>,
    err: &WorkerError,
) {
    tracing::warn!(job_id = %session.job_id, %err, "generation failed");
    let event = ProgressEvent {
        stage: Stage::Error,
        progress: Some(session.progress()),
        message: Some(err.to_string()),
        ..ProgressEvent::default()
    };
    finalize(db, session, tx, JobStatus::Error, event, None).await;
}

/// Write the terminal record and queue the terminal frame, exactly once per
/// session. The store write happens first so a poll racing the stream close
/// observes a state consistent with the delivered terminal event.
async fn finalize(
    db: &Database,
    session: &JobSession,
    tx: &mpsc::Sender<SessionMessage>,
    status: JobStatus,
    event: ProgressEvent,
    artifact: Option<&Path>,
) {
    if !session.try_finalize() {
        return;
    }
    if let Some(path) = artifact {
        if let Err(err) = db.set_artifact(&session.job_id, &path.to_string_lossy()).await {
            tracing::error!(job_id = %session.job_id, %err, "failed to record artifact path");
        }
    }
    let progress = event.progress.unwrap_or_else(|| session.progress());
    if let Err(err) = db
        .set_status(&session.job_id, status, event.message.as_deref(), progress)
        .await
    {
        tracing::error!(job_id = %session.job_id, %err, "failed to write terminal job status");
    }
    let _ = tx.send(SessionMessage::Terminal(event)).await;
}

fn spawn_stderr_reader(
    stderr: Option<ChildStderr>,
    tx: mpsc::Sender<SessionMessage>,
    job_id: String,
) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut acc = String::new();
        let Some(mut stderr) = stderr else {
            return acc;
        };
        // tqdm redraws with bare carriage returns, so split on those too.
        let mut asm = LineAssembler::with_cr_splitting();
        let mut buf = BytesMut::with_capacity(4 * 1024);
        loop {
            buf.clear();
            match stderr.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    for line in asm.push(&buf) {
                        consume_stderr_line(&job_id, line, &mut acc, &tx).await;
                    }
                }
                Err(err) => {
                    tracing::debug!(job_id, %err, "error reading worker stderr");
                    break;
                }
            }
        }
        if let Some(line) = asm.finish() {
            consume_stderr_line(&job_id, line, &mut acc, &tx).await;
        }
        acc
    })
}

/// Accumulate a stderr line (bounded) and forward non-benign lines as
/// error-stage frames. Benign noise is logged only.
async fn consume_stderr_line(
    job_id: &str,
    line: String,
    acc: &mut String,
    tx: &mpsc::Sender<SessionMessage>,
) {
    if !acc.is_empty() {
        acc.push('\n');
    }
    acc.push_str(&line);
    if acc.len() > STDERR_CAP {
        let mut cut = acc.len() - STDERR_CAP;
        while !acc.is_char_boundary(cut) {
            cut += 1;
        }
        acc.drain(..cut);
    }

    if is_benign_stderr(&line) {
        tracing::debug!(job_id, line = %line, "worker stderr (benign)");
    } else {
        tracing::warn!(job_id, line = %line, "worker stderr");
        let _ = tx
            .send(SessionMessage::Progress(ProgressEvent::error_line(line)))
            .await;
    }
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => match status.signal() {
            Some(sig) => format!("signal {sig}"),
            None => "unknown termination".to_string(),
        },
    }
}

/// Last `max` characters of a diagnostic blob.
fn tail_chars(s: &str, max: usize) -> String {
    let trimmed = s.trim_end();
    let count = trimmed.chars().count();
    if count <= max {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - max).collect()
    }
}
