//! Line-delimited codec.
//!
//! Frames are separated by a single `\n`. A trailing `\r` and any surrounding
//! whitespace are trimmed, and lines that are empty after trimming are
//! skipped without producing a frame.

use crate::error::ProtocolError;
use crate::DELIMITER;
use bytes::BytesMut;

/// Encodes a value as a single JSON line, delimiter included.
///
/// `serde_json` escapes control characters inside strings, so the output
/// never contains a newline before the trailing delimiter.
pub fn encode_line<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

/// Incremental line decoder over an append-only byte buffer.
///
/// Bytes are appended with [`extend`](Self::extend); complete lines are
/// removed from the front of the buffer as they are decoded. A partial line
/// stays buffered until its delimiter arrives.
pub struct LineDecoder {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known not to contain a delimiter.
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next non-empty line.
    ///
    /// Returns `Ok(None)` when no complete line is buffered. A line that is
    /// not valid UTF-8 is consumed and reported as an error, so decoding can
    /// continue with the next line.
    pub fn decode_frame(&mut self) -> Result<Option<String>, ProtocolError> {
        loop {
            let pos = match self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == DELIMITER)
            {
                Some(offset) => self.scanned + offset,
                None => {
                    self.scanned = self.buffer.len();
                    return Ok(None);
                }
            };

            let line = self.buffer.split_to(pos + 1);
            self.scanned = 0;

            let text =
                std::str::from_utf8(&line[..pos]).map_err(|_| ProtocolError::InvalidUtf8)?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }

    /// Returns an iterator draining every complete line currently buffered.
    ///
    /// The iterator ends when the buffer holds no further delimiter; calling
    /// `frames()` again after more bytes arrive picks up where it left off.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the complete frames in a [`LineDecoder`].
pub struct Frames<'a> {
    decoder: &'a mut LineDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<String, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.decode_frame().transpose()
    }
}
