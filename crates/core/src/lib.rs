// crates/core/src/lib.rs
//! Core types and the progress translator for the relive generation service.
//!
//! This crate is pure: no I/O, no async. The server feeds it raw worker
//! output chunks; the client feeds it raw SSE body chunks. Both sides share
//! the same byte-level line assembly so partial reads and multi-byte UTF-8
//! sequences split across chunks behave identically everywhere.

pub mod error;
pub mod event;
pub mod lines;
pub mod phases;
pub mod translator;

pub use error::WorkerError;
pub use event::{ProgressEvent, Stage};
pub use lines::LineAssembler;
pub use phases::{match_phase, Phase, PHASES};
pub use translator::{is_benign_stderr, ProgressTranslator, PROGRESS_SENTINEL};
