// crates/core/src/error.rs
//! Worker failure taxonomy, shared between the supervisor and the HTTP
//! error mapping.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between "start this job" and "the worker
/// produced its artifact".
///
/// Precondition failures (`InputMissing`, `WorkerUnavailable`) are detected
/// before the process exists; the rest describe a spawned worker. Each
/// failure surfaces as exactly one terminal error event on the stream.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("input file not found: {}", path.display())]
    InputMissing { path: PathBuf },

    #[error("worker script not found: {}", path.display())]
    WorkerUnavailable { path: PathBuf },

    #[error("failed to spawn worker process: {source}")]
    SpawnFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("worker exited with {code}: {stderr_tail}")]
    ExitedNonZero { code: String, stderr_tail: String },

    #[error("worker reported success but produced no artifact at {}", path.display())]
    ArtifactMissing { path: PathBuf },
}
