// crates/server/src/state.rs
//! Application state for the Axum server.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use relive_db::Database;

use crate::config::Config;
use crate::session::ActiveSessions;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job record store.
    pub db: Database,
    /// Resolved runtime configuration.
    pub config: Config,
    /// Currently running supervision sessions, one per job id.
    ///
    /// Uses `std::sync::RwLock` (not `tokio::sync::RwLock`): critical
    /// sections are tiny map operations and the lock is never held across
    /// an `.await` point — and the session guard must be able to remove its
    /// entry from a synchronous `Drop`.
    pub active: ActiveSessions,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(db: Database, config: Config) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}
