// crates/client/src/consumer.rs
//! The resilient stream consumer.
//!
//! Each chunk read races a fixed timeout; timeouts and transient read
//! errors retry with a short backoff up to a bound before the consumer
//! gives up. The consumer distinguishes a worker-reported failure from a
//! connectivity failure, and a stream that closes without a terminal event
//! is always a failure — progress below 100 is never inferred as success.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use relive_core::{LineAssembler, ProgressEvent, Stage};

use crate::frames::{classify, SseLine};
use crate::ClientError;

/// Tuning knobs for the consumer's resilience behavior.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Ceiling on a single chunk read before it counts as a failure.
    pub read_timeout: Duration,
    /// Consecutive read failures tolerated before giving up.
    pub max_retries: u32,
    /// Pause between read retries.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// How one streaming session ended, from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Terminal `success` event: the artifact reference and final message.
    Success {
        artifact: Option<String>,
        message: Option<String>,
    },
    /// Terminal `error` event from the server/worker.
    WorkerFailed { message: String },
    /// Stream closed without a terminal event. Always a failure.
    Incomplete { last_progress: u8 },
    /// Read retries exhausted — a connectivity failure, distinct from a
    /// worker-reported error.
    ConnectionLost,
    /// [`StreamConsumer::cancel`] was called.
    Cancelled,
}

/// Opens generation streams against a relive server.
pub struct GenerationClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            user_id: user_id.into(),
        }
    }

    /// Start generation for a job. Returns the open streaming response,
    /// ready to hand to [`StreamConsumer::consume`].
    pub async fn start(&self, job_id: &str) -> Result<reqwest::Response, ClientError> {
        let url = format!(
            "{}/api/jobs/{}/generate",
            self.base_url.trim_end_matches('/'),
            job_id
        );
        let response = self
            .http
            .post(url)
            .header("x-user-id", &self.user_id)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

/// Reads one generation stream and reduces it to a [`StreamOutcome`].
///
/// Cheap to clone: a UI holds a clone for [`cancel`](Self::cancel) and
/// [`time_since_progress`](Self::time_since_progress) while the read loop
/// runs elsewhere.
#[derive(Clone, Default)]
pub struct StreamConsumer {
    config: ConsumerConfig,
    cancel: CancellationToken,
    last_progress: Arc<Mutex<Option<Instant>>>,
}

impl StreamConsumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            last_progress: Arc::new(Mutex::new(None)),
        }
    }

    /// Abort the in-flight read, if any. Safe to call at any time, any
    /// number of times — with no active stream it is a no-op. Dropping the
    /// aborted response body closes the connection, which the server
    /// observes as a disconnect and answers by tearing down the worker.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Time since the last progress-bearing event, for stall warnings.
    ///
    /// Independent of the read-timeout machinery: heartbeats keep the reads
    /// healthy, so a wedged worker shows up here long before any read
    /// fails. `None` until a stream has started.
    pub fn time_since_progress(&self) -> Option<Duration> {
        match self.last_progress.lock() {
            Ok(guard) => guard.map(|t| t.elapsed()),
            Err(e) => {
                tracing::error!("lock poisoned reading progress clock: {e}");
                None
            }
        }
    }

    fn mark_progress(&self) {
        match self.last_progress.lock() {
            Ok(mut guard) => *guard = Some(Instant::now()),
            Err(e) => tracing::error!("lock poisoned updating progress clock: {e}"),
        }
    }

    /// Consume the stream to completion, invoking `on_event` for every
    /// decoded progress event (terminal ones included).
    pub async fn consume<F>(&self, response: reqwest::Response, mut on_event: F) -> StreamOutcome
    where
        F: FnMut(&ProgressEvent),
    {
        if self.cancel.is_cancelled() {
            return StreamOutcome::Cancelled;
        }
        self.mark_progress();

        let mut stream = response.bytes_stream();
        let mut lines = LineAssembler::new();
        let mut failures = 0u32;
        let mut last_progress: u8 = 0;

        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                read = tokio::time::timeout(self.config.read_timeout, stream.next()) => read,
            };

            let chunk = match read {
                Err(_elapsed) => {
                    failures += 1;
                    tracing::warn!(failures, "stream read timed out");
                    if failures >= self.config.max_retries {
                        return StreamOutcome::ConnectionLost;
                    }
                    if self.backoff().await {
                        return StreamOutcome::Cancelled;
                    }
                    continue;
                }
                Ok(Some(Err(err))) => {
                    failures += 1;
                    tracing::warn!(failures, %err, "stream read failed");
                    if failures >= self.config.max_retries {
                        return StreamOutcome::ConnectionLost;
                    }
                    if self.backoff().await {
                        return StreamOutcome::Cancelled;
                    }
                    continue;
                }
                Ok(None) => break,
                Ok(Some(Ok(chunk))) => chunk,
            };
            failures = 0;

            for line in lines.push(&chunk) {
                if let Some(outcome) =
                    self.handle_line(&line, &mut last_progress, &mut on_event)
                {
                    return outcome;
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(outcome) = self.handle_line(&line, &mut last_progress, &mut on_event) {
                return outcome;
            }
        }

        // End of stream with no terminal event: incomplete generation, not
        // success — no matter how far progress got.
        StreamOutcome::Incomplete { last_progress }
    }

    /// Process one line; `Some` means a terminal outcome was reached.
    fn handle_line<F>(
        &self,
        line: &str,
        last_progress: &mut u8,
        on_event: &mut F,
    ) -> Option<StreamOutcome>
    where
        F: FnMut(&ProgressEvent),
    {
        let payload = match classify(line) {
            SseLine::Data(payload) => payload,
            // Heartbeats and field lines carry no events.
            SseLine::Comment | SseLine::Other => return None,
        };

        let event: ProgressEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(%err, payload, "skipping undecodable frame");
                return None;
            }
        };

        if let Some(p) = event.progress {
            *last_progress = (*last_progress).max(p);
            self.mark_progress();
        }
        on_event(&event);

        match event.stage {
            Stage::Success => Some(StreamOutcome::Success {
                artifact: event.detail,
                message: event.message,
            }),
            Stage::Error => Some(StreamOutcome::WorkerFailed {
                message: event
                    .message
                    .unwrap_or_else(|| "generation failed".to_string()),
            }),
            Stage::Processing => None,
        }
    }

    /// Sleep out the retry backoff; true if cancelled while waiting.
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.retry_backoff) => false,
        }
    }
}
