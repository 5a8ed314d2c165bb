// crates/server/src/main.rs
//! Relive server binary.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use relive_db::Database;
use relive_server::{create_app, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    // Data layout under the data dir: uploads/, work/<job>/, videos/.
    for dir in [
        config.data_dir.clone(),
        config.uploads_dir(),
        config.videos_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    if !config.worker_script.is_file() {
        tracing::warn!(
            script = %config.worker_script.display(),
            "worker script not found at startup; generation requests will fail until it exists"
        );
    }

    let db = Database::new(&config.db_path).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(db, config);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("relive server listening on http://{addr}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
