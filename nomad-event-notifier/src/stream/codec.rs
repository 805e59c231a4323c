//! Newline-delimited frame splitting for the streaming response body.

use bytes::{Bytes, BytesMut};

/// Upper bound on a single frame. Larger lines mean a broken stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete, non-blank line (without the terminator).
    ///
    /// Returns `Err(len)` when the buffered partial line exceeds [`MAX_FRAME_LEN`].
    pub fn next_line(&mut self) -> Result<Option<Bytes>, usize> {
        loop {
            let Some(pos) = memchr::memchr(b'\n', &self.buf) else {
                if self.buf.len() > MAX_FRAME_LEN {
                    return Err(self.buf.len());
                }
                return Ok(None);
            };

            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line.freeze()));
        }
    }
}
