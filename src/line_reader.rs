use std::io::{BufRead, BufReader, Read};

use crate::error::{CacheError, Result};

/// A strictly line-oriented reader over a byte stream.
///
/// Lines are terminated by `\n` or `\r\n`; the terminator is never included
/// in the returned line. End-of-input is signalled by `Ok(None)`, distinct
/// from an I/O failure, which is an `Err`. A final line with no terminator is
/// discarded rather than returned — callers that care can check
/// [`LineReader::had_incomplete_trailing_line`] afterwards.
///
/// The byte-to-character mapping is restricted to 7-bit ASCII: `\n` and `\r`
/// only ever occur as terminators, so a line containing a non-ASCII byte is
/// treated as corruption rather than silently passed through.
pub struct LineReader<R> {
    inner: BufReader<R>,
    had_incomplete_trailing_line: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        LineReader {
            inner: BufReader::new(inner),
            had_incomplete_trailing_line: false,
        }
    }

    /// Reads the next line, or `Ok(None)` at clean end-of-input.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') {
            // Trailing bytes with no terminator: a torn write or a truncated
            // file. Discard and report clean end-of-input to the caller.
            self.had_incomplete_trailing_line = true;
            return Ok(None);
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if !buf.iter().all(|b| b.is_ascii() && *b != 0) {
            return Err(CacheError::Corruption(
                "journal line is not 7-bit ASCII".into(),
            ));
        }
        Ok(Some(String::from_utf8(buf).expect("checked above to be ASCII")))
    }

    /// Whether a final, unterminated line was discarded by the last call to
    /// [`read_line`](Self::read_line) that returned `Ok(None)`.
    pub fn had_incomplete_trailing_line(&self) -> bool {
        self.had_incomplete_trailing_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_lf_terminated_lines() {
        let mut r = LineReader::new(Cursor::new(b"one\ntwo\nthree\n".to_vec()));
        assert_eq!(r.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(r.read_line().unwrap().as_deref(), Some("two"));
        assert_eq!(r.read_line().unwrap().as_deref(), Some("three"));
        assert_eq!(r.read_line().unwrap(), None);
    }

    #[test]
    fn reads_crlf_terminated_lines() {
        let mut r = LineReader::new(Cursor::new(b"one\r\ntwo\r\n".to_vec()));
        assert_eq!(r.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(r.read_line().unwrap().as_deref(), Some("two"));
        assert_eq!(r.read_line().unwrap(), None);
    }

    #[test]
    fn discards_unterminated_trailing_line() {
        let mut r = LineReader::new(Cursor::new(b"one\ntwo".to_vec()));
        assert_eq!(r.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(r.read_line().unwrap(), None);
        assert!(r.had_incomplete_trailing_line());
    }

    #[test]
    fn empty_input_is_clean_eof() {
        let mut r = LineReader::new(Cursor::new(Vec::new()));
        assert_eq!(r.read_line().unwrap(), None);
        assert!(!r.had_incomplete_trailing_line());
    }
}
