// crates/client/src/lib.rs
//! Client-side consumer for the relive generation stream.
//!
//! Pairs with the server's SSE transport: opens the generation request,
//! reads the event stream resiliently (read timeouts, bounded retries,
//! explicit cancellation), and reduces it to a single
//! [`StreamOutcome`] the host UI can act on.

pub mod consumer;
pub mod frames;

pub use consumer::{ConsumerConfig, GenerationClient, StreamConsumer, StreamOutcome};

use thiserror::Error;

/// Failures opening the generation stream (before any frame is read).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected generation request ({status}): {message}")]
    Rejected { status: u16, message: String },
}
