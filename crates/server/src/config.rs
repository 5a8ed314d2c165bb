// crates/server/src/config.rs
//! Server configuration from environment variables.

use std::path::PathBuf;

use crate::supervisor::WorkerConfig;

/// Default port for the server.
const DEFAULT_PORT: u16 = 47911;

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Root directory for uploads, worker scratch space, and finished videos.
    pub data_dir: PathBuf,
    /// SQLite database location.
    pub db_path: PathBuf,
    /// Interpreter used to run the worker script.
    pub python_bin: String,
    /// Path to the worker script.
    pub worker_script: PathBuf,
}

impl Config {
    /// Resolve configuration from the environment.
    ///
    /// - `RELIVE_PORT` (or `PORT`) — listen port, default 47911
    /// - `RELIVE_DATA_DIR` — data root, default `./data`
    /// - `RELIVE_DB_PATH` — database file, default `<data_dir>/relive.db`
    /// - `RELIVE_PYTHON_BIN` — worker interpreter, default `python3`
    /// - `RELIVE_WORKER_SCRIPT` — worker script, default
    ///   `./worker/generate_video.py`
    pub fn from_env() -> Self {
        let port = std::env::var("RELIVE_PORT")
            .ok()
            .or_else(|| std::env::var("PORT").ok())
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let data_dir = std::env::var("RELIVE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let db_path = std::env::var("RELIVE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("relive.db"));

        let python_bin =
            std::env::var("RELIVE_PYTHON_BIN").unwrap_or_else(|_| "python3".to_string());

        let worker_script = std::env::var("RELIVE_WORKER_SCRIPT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("worker/generate_video.py"));

        Self {
            port,
            data_dir,
            db_path,
            python_bin,
            worker_script,
        }
    }

    /// Where accepted uploads are stored.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Per-job scratch directory handed to the worker as its output dir.
    pub fn work_dir(&self, job_id: &str) -> PathBuf {
        self.data_dir.join("work").join(job_id)
    }

    /// Where finished artifacts land, one per job id.
    pub fn videos_dir(&self) -> PathBuf {
        self.data_dir.join("videos")
    }

    /// The supervisor-facing slice of the configuration.
    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            python_bin: self.python_bin.clone(),
            script: self.worker_script.clone(),
        }
    }
}
