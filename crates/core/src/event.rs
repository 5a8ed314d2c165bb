// crates/core/src/event.rs
//! Progress event types shared by the supervisor, the SSE transport, and
//! the stream consumer.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// Terminal/intermediate classification of a progress event.
///
/// The wire vocabulary is closed: anything that is not `success` or `error`
/// counts as intermediate. Workers have emitted ad-hoc stage strings across
/// versions (`"rendering"` among them), so classification is lenient by
/// contract rather than by accident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Processing,
    Success,
    Error,
}

impl Stage {
    /// Classify a raw stage string. Unknown values are intermediate.
    pub fn classify(raw: &str) -> Self {
        match raw {
            "success" => Stage::Success,
            "error" => Stage::Error,
            _ => Stage::Processing,
        }
    }

    /// True for the stages that end a streaming session.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Stage::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Processing => "processing",
            Stage::Success => "success",
            Stage::Error => "error",
        }
    }
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Stage::classify(&raw))
    }
}

/// One structured update describing worker progress.
///
/// All fields besides `stage` are optional on the wire, and consumers must
/// tolerate unknown extra fields (serde's default behavior).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default)]
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProgressEvent {
    /// Intermediate event synthesized from a phase marker match.
    pub fn phase(step: &str, progress: u8) -> Self {
        Self {
            stage: Stage::Processing,
            progress: Some(progress),
            step: Some(step.to_string()),
            ..Self::default()
        }
    }

    /// Error-stage event carrying a worker diagnostic line.
    pub fn error_line(message: impl Into<String>) -> Self {
        Self {
            stage: Stage::Error,
            message: Some(message.into()),
            ..Self::default()
        }
    }
}
