// crates/core/src/lines.rs
//! Chunk-tolerant line assembly.
//!
//! Both ends of the progress stream receive text in arbitrary read-sized
//! chunks: the supervisor from the worker's stdout pipe, the consumer from
//! the HTTP response body. `LineAssembler` buffers at the byte level and
//! only decodes once a full line is delimited, so a multi-byte UTF-8
//! sequence split across two chunks never corrupts.

use memchr::memchr;

/// Splits an incoming byte stream into complete lines, retaining the
/// trailing partial segment between pushes.
///
/// Lines are delimited by `\n`; a single `\r` immediately before the `\n`
/// is stripped. In CR-splitting mode a bare `\r` also delimits a line
/// (tqdm-style progress bars redraw with carriage returns and may never
/// emit a newline), and blank segments are collapsed so `\r\n` does not
/// produce a phantom empty line.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
    split_cr: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembler that also treats bare `\r` as a line terminator.
    pub fn with_cr_splitting() -> Self {
        Self {
            buf: Vec::new(),
            split_cr: true,
        }
    }

    /// Feed a chunk; returns every line completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            let nl = memchr(b'\n', &self.buf);
            let sep = if self.split_cr {
                match (nl, memchr(b'\r', &self.buf)) {
                    (Some(n), Some(c)) => Some(n.min(c)),
                    (a, b) => a.or(b),
                }
            } else {
                nl
            };
            let Some(pos) = sep else { break };

            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the separator itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if self.split_cr && line.is_empty() {
                continue;
            }
            out.push(String::from_utf8_lossy(&line).into_owned());
        }
        out
    }

    /// Flush the retained partial segment, if any. Called at end of stream
    /// so a final unterminated line is not lost.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}
