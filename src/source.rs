use std::io::BufRead;

use crate::error::{Result, SplitError};

/// Pull side of the pipeline: hands out one line at a time, newline stripped.
pub trait LineSource {
    fn next_line(&mut self) -> Result<Option<Vec<u8>>>;

    /// 1-based number of the line most recently returned.
    fn line_number(&self) -> usize;
}

/// Reads lines as raw bytes so dumps that are not valid UTF-8 pass through intact.
pub struct ReaderSource<R> {
    reader: R,
    line: usize,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line: 0 }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| SplitError::Read {
                line: self.line + 1,
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }

    fn line_number(&self) -> usize {
        self.line
    }
}
