//! Incremental line framing for agent stdout.
//!
//! The agent writes one JSON record per line, but the OS hands us arbitrary
//! byte chunks that can split a line, or even a multi-byte UTF-8 character,
//! anywhere. Framing therefore happens on raw bytes (the `\n` separator is a
//! single byte, so it can never be split), and a line is only converted to
//! text once it is complete.

/// Turns raw stdout chunks into complete, separator-stripped lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw bytes, yielding every line completed by it.
    ///
    /// Trailing bytes after the last separator are buffered until a later
    /// chunk completes them. Invalid UTF-8 inside a complete line is replaced
    /// rather than dropped, so one bad byte cannot desynchronize the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes of the buffered partial line, if any.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take the buffered partial line as text, if any. Called at stream EOF,
    /// where a final record may legitimately lack its separator.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Drop any buffered partial line. Called between sends so a truncated
    /// line from a killed process cannot leak into the next stream.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
