// crates/client/src/frames.rs
//! SSE frame-line classification.
//!
//! The server emits single-line `data:` frames and comment-frame
//! heartbeats. Everything else on the wire (blank dispatch lines, `event:`
//! or `id:` fields a future server version might add) is ignored.

/// Classification of one line of an SSE stream.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// A data frame payload (the part after `data:`).
    Data(&'a str),
    /// A comment frame — the heartbeat encoding. Carries no payload.
    Comment,
    /// Anything else: blank separators, field lines, noise.
    Other,
}

/// Classify one line of an SSE stream.
pub fn classify(line: &str) -> SseLine<'_> {
    if let Some(rest) = line.strip_prefix("data:") {
        SseLine::Data(rest.strip_prefix(' ').unwrap_or(rest))
    } else if line.starts_with(':') {
        SseLine::Comment
    } else {
        SseLine::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_with_and_without_space() {
        assert_eq!(classify("data: {\"progress\":5}"), SseLine::Data("{\"progress\":5}"));
        assert_eq!(classify("data:{\"progress\":5}"), SseLine::Data("{\"progress\":5}"));
    }

    #[test]
    fn comment_lines_are_heartbeats() {
        assert_eq!(classify(":"), SseLine::Comment);
        assert_eq!(classify(": keep-alive"), SseLine::Comment);
    }

    #[test]
    fn everything_else_is_ignored() {
        assert_eq!(classify(""), SseLine::Other);
        assert_eq!(classify("event: progress"), SseLine::Other);
        assert_eq!(classify("id: 7"), SseLine::Other);
        assert_eq!(classify("retry: 1000"), SseLine::Other);
    }
}
