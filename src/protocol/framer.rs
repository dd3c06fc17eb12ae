//! Newline framing for the device's ASCII stream.
//!
//! Bytes arrive in arbitrary chunks; [`LineFramer::feed`] returns every line completed
//! by the chunk and keeps the trailing partial line for the next call. A carriage return
//! directly before the terminator is stripped, since the firmware ends lines with
//! `WriteLine` on some builds.
//!
//! The partial-line accumulator is not capped. A device that never sends a terminator
//! grows it without bound.

use bytes::{Buf, BytesMut};

/// Line terminator on the wire.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Splits a byte stream into lines.
///
/// Bytes after the last terminator are held until more input completes the line.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: BytesMut,
}

impl LineFramer {
    /// A framer with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every complete line, in arrival order.
    ///
    /// Invalid UTF-8 is replaced rather than dropped so the line count always matches
    /// the terminator count.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == LINE_TERMINATOR) {
            let raw = self.pending.split_to(pos);
            self.pending.advance(1);

            let bytes = raw.strip_suffix(b"\r").unwrap_or(&raw[..]);
            lines.push(String::from_utf8_lossy(bytes).into_owned());
        }
        lines
    }

    /// Bytes received after the last terminator.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop any partial line (e.g. after the link was reopened).
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"ACQ.\n1A:3.5\n"), vec!["ACQ.", "1A:3.5"]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn keeps_partial_line_between_calls() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"PAR").is_empty());
        assert_eq!(framer.pending(), b"PAR");
        assert_eq!(framer.feed(b"SED.\nEN"), vec!["PARSED."]);
        assert_eq!(framer.feed(b"D.\n"), vec!["END."]);
    }

    #[test]
    fn strips_carriage_return() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"READY...\r\n"), vec!["READY..."]);
    }

    #[test]
    fn empty_lines_are_preserved() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn line_count_independent_of_chunking() {
        let stream = b"ACQ.\n01:1.000000\n02: 2.500000\r\nERR!\nEND.\nPARSED.\ntail";
        let terminators = stream.iter().filter(|&&b| b == LINE_TERMINATOR).count();

        let mut whole = LineFramer::new();
        let expected = whole.feed(stream);
        assert_eq!(expected.len(), terminators);

        for chunk_size in 1..=stream.len() {
            let mut framer = LineFramer::new();
            let mut lines = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                lines.extend(framer.feed(chunk));
            }
            assert_eq!(lines, expected, "chunk size {chunk_size}");
            assert_eq!(framer.pending(), b"tail");
        }
    }

    #[test]
    fn reset_discards_partial() {
        let mut framer = LineFramer::new();
        framer.feed(b"garbage");
        framer.reset();
        assert_eq!(framer.feed(b"ok\n"), vec!["ok"]);
    }
}
