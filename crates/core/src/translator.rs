// crates/core/src/translator.rs
//! Worker stdout → progress event translation.
//!
//! Two-tier by contract: structured `PROGRESS:` JSON lines are preferred,
//! and banner-marker matching is the fallback for worker builds that never
//! emit them. Unrecognized lines produce no event but are kept in a bounded
//! tail for diagnostics. This tolerance is deliberate — the worker's output
//! format has varied across versions and a noisy line must never abort the
//! stream.

use std::collections::VecDeque;

use serde::Deserialize;

use crate::event::{ProgressEvent, Stage};
use crate::lines::LineAssembler;
use crate::phases::match_phase;

/// Prefix marking a structured progress line on worker stdout.
pub const PROGRESS_SENTINEL: &str = "PROGRESS:";

/// Lines of stdout kept for the diagnostic tail.
const TAIL_LINES: usize = 50;

/// Raw shape of a sentinel line's JSON payload. Looser than
/// [`ProgressEvent`]: the stage is an open string and progress is unclamped,
/// both normalized during translation.
#[derive(Debug, Deserialize)]
struct RawProgress {
    stage: Option<String>,
    progress: Option<i64>,
    step: Option<String>,
    message: Option<String>,
    detail: Option<String>,
}

/// Stateful translator from chunked worker stdout to progress events.
#[derive(Debug, Default)]
pub struct ProgressTranslator {
    lines: LineAssembler,
    tail: VecDeque<String>,
}

impl ProgressTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw stdout chunk; returns the events completed by it, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<ProgressEvent> {
        let lines = self.lines.push(chunk);
        lines
            .iter()
            .filter_map(|line| self.translate_line(line))
            .collect()
    }

    /// Flush the final partial line at end of stream.
    pub fn finish(&mut self) -> Vec<ProgressEvent> {
        match self.lines.finish() {
            Some(line) => self.translate_line(&line).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Translate one complete line. Records the line in the diagnostic tail
    /// regardless of whether it produces an event.
    pub fn translate_line(&mut self, line: &str) -> Option<ProgressEvent> {
        if self.tail.len() == TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());

        if let Some(payload) = line.strip_prefix(PROGRESS_SENTINEL) {
            return match serde_json::from_str::<RawProgress>(payload.trim()) {
                Ok(raw) => Some(ProgressEvent {
                    stage: raw.stage.as_deref().map(Stage::classify).unwrap_or_default(),
                    progress: raw.progress.map(clamp_progress),
                    step: raw.step,
                    message: raw.message,
                    detail: raw.detail,
                }),
                Err(err) => {
                    tracing::debug!(%err, line, "dropping malformed progress line");
                    None
                }
            };
        }

        match_phase(line).map(|p| ProgressEvent::phase(p.step, p.progress))
    }

    /// Most recent stdout lines, oldest first.
    pub fn tail(&self) -> Vec<String> {
        self.tail.iter().cloned().collect()
    }
}

fn clamp_progress(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}

/// Stderr patterns that are logged but not surfaced to the client:
/// Python warning chatter and tqdm progress-bar redraws.
const BENIGN_STDERR: &[&str] = &[
    "DeprecationWarning",
    "FutureWarning",
    "UserWarning",
    "warnings.warn",
    "%|",
    "it/s]",
    "s/it]",
];

/// Whether a stderr line is known-benign noise.
pub fn is_benign_stderr(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || BENIGN_STDERR.iter().any(|pat| trimmed.contains(pat))
}
