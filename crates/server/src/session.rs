// crates/server/src/session.rs
//! Per-job supervision session context.
//!
//! One `JobSession` exists per active generation. It is the only state the
//! two concurrent units of a session (the worker pump and the SSE transport)
//! share: a single cancellation signal, the progress high-water mark, and
//! the finalized latch that makes the terminal store write happen exactly
//! once no matter which side performs it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

/// Shared map of currently running sessions, keyed by job id. Guarantees
/// one worker process per job id.
pub type ActiveSessions = Arc<RwLock<HashMap<String, Arc<JobSession>>>>;

/// Context for one supervision session.
pub struct JobSession {
    pub job_id: String,
    cancel: CancellationToken,
    high_water: AtomicU8,
    finalized: AtomicBool,
}

impl JobSession {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            cancel: CancellationToken::new(),
            high_water: AtomicU8::new(0),
            finalized: AtomicBool::new(false),
        }
    }

    /// Request cancellation. Idempotent; safe after the worker has exited.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for `select!`-style cancellation waits.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fold a reported progress value into the session's high-water mark and
    /// return the clamped (non-decreasing) value readers should observe.
    pub fn observe_progress(&self, progress: u8) -> u8 {
        self.high_water.fetch_max(progress, Ordering::Relaxed);
        self.high_water.load(Ordering::Relaxed)
    }

    /// Current progress high-water mark.
    pub fn progress(&self) -> u8 {
        self.high_water.load(Ordering::Relaxed)
    }

    /// Claim the terminal write for this session. Returns true exactly once.
    pub fn try_finalize(&self) -> bool {
        self.finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Removes the session from the active map and fires its cancellation
/// signal when the SSE response stream is dropped — on normal completion
/// this is a no-op (the worker already exited); on client disconnect it is
/// what tears the worker down.
pub struct SessionGuard {
    sessions: ActiveSessions,
    session: Arc<JobSession>,
}

impl SessionGuard {
    pub fn new(sessions: ActiveSessions, session: Arc<JobSession>) -> Self {
        Self { sessions, session }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.cancel();
        match self.sessions.write() {
            Ok(mut map) => {
                map.remove(&self.session.job_id);
            }
            Err(e) => tracing::error!("RwLock poisoned removing session: {e}"),
        }
    }
}
