//! Line framing for the modem byte stream

use crate::{
    constants::{LINE_TERMINATOR, MAX_LINE_SIZE},
    error::{AtError, AtResult},
};

/// Splits the modem byte stream into CRLF-delimited lines.
///
/// Bytes without a terminator stay buffered until the next read completes
/// the line. The SMS send prompt (`> `) is never terminated on its own, so
/// it stays pending until the CRLF that opens the modem's next line, and is
/// then yielded as a line of its own.
#[derive(Debug, Default)]
pub struct LineParser {
    buffer: Vec<u8>,
}

impl LineParser {
    /// Create new parser
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Add data to the parser buffer
    pub fn add_data(&mut self, data: &[u8]) -> AtResult<()> {
        self.buffer
            .extend_from_slice(data);
        if self.buffer.len() > MAX_LINE_SIZE && self.find_terminator().is_none() {
            return Err(AtError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "{} bytes buffered without a line terminator",
                    self.buffer.len()
                ),
            )));
        }
        Ok(())
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Try to extract the next non-empty line from the buffer.
    ///
    /// Empty lines (the blank CRLF pairs modems wrap around every response)
    /// are consumed and skipped. Invalid UTF-8 is replaced rather than
    /// rejected: a single corrupted byte must not kill the session.
    pub fn parse_line(&mut self) -> Option<String> {
        while let Some(pos) = self.find_terminator() {
            let raw: Vec<u8> = self
                .buffer
                .drain(..pos + LINE_TERMINATOR.len())
                .take(pos)
                .collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_matches(|c| c == '\r' || c == '\n');
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }

    fn find_terminator(&self) -> Option<usize> {
        let terminator = LINE_TERMINATOR.as_bytes();
        self.buffer
            .windows(terminator.len())
            .position(|w| w == terminator)
    }
}
