// crates/core/src/phases.rs
//! Fallback phase-marker table.
//!
//! Older worker builds predate the structured `PROGRESS:` lines and only
//! announce phases as banner text on stdout. Each marker is a substring of
//! one such banner, paired with the step label and the approximate progress
//! that phase represents. The table is ordered; the first match wins.

/// One phase the worker passes through, with its banner marker and the
/// approximate progress it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub marker: &'static str,
    pub step: &'static str,
    pub progress: u8,
}

/// Ordered marker table, matching the worker's phase sequence.
pub const PHASES: &[Phase] = &[
    Phase { marker: "LOADING", step: "Loading Data", progress: 5 },
    Phase { marker: "MAP MATCHING", step: "Map Matching", progress: 15 },
    Phase { marker: "STOP DETECTION", step: "Stop Detection", progress: 25 },
    Phase { marker: "CAPTURING STOP PHOTOS", step: "Capturing Photos", progress: 35 },
    Phase { marker: "GENERATING ADAPTIVE FRAMES", step: "Frame Generation", progress: 50 },
    Phase { marker: "HTML viewer", step: "HTML Generation", progress: 65 },
    Phase { marker: "RENDERING", step: "Rendering video", progress: 75 },
];

/// First phase whose marker occurs in the line, if any.
pub fn match_phase(line: &str) -> Option<&'static Phase> {
    PHASES.iter().find(|p| line.contains(p.marker))
}
