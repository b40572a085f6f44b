//! Newline framing for the child's stdio streams.
//!
//! [`LineFramer`] owns the byte buffer and hands out one complete line at a
//! time; [`FrameReader`] drives it from an async reader.

use bytes::BytesMut;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Longest line accepted from the child. Longer lines are discarded whole.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Incremental line splitter over raw bytes.
///
/// Each byte is searched for a newline once: the scan resumes where the
/// previous call stopped.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Bytes of `buffer` already known to contain no newline.
    scanned: usize,
    max_line: usize,
    /// Inside an oversized line; drop everything up to its newline.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Append raw bytes read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete, non-empty line, without its terminator.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n')
            else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_line {
                    tracing::debug!(
                        "Discarding line longer than {} bytes from child output",
                        self.max_line
                    );
                    self.buffer.clear();
                    self.scanned = 0;
                    self.discarding = true;
                }
                return None;
            };

            let pos = self.scanned + offset;
            let mut line = self.buffer.split_to(pos + 1);
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) || pos > self.max_line {
                continue;
            }

            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }
            return Some(text.into_owned());
        }
    }

    /// Bytes received after the last newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Reads complete lines from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
    framer: LineFramer,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            framer: LineFramer::new(),
            chunk: vec![0; READ_CHUNK],
        }
    }

    /// Next complete line, or `None` once the stream is closed.
    ///
    /// A trailing partial line at end of stream is dropped.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(line) = self.framer.next_frame() {
                return Ok(Some(line));
            }
            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                if self.framer.pending_len() > 0 {
                    tracing::debug!(
                        "Discarding {} bytes of unterminated output",
                        self.framer.pending_len()
                    );
                }
                return Ok(None);
            }
            self.framer.push(&self.chunk[..n]);
        }
    }
}

/// Serialize a message as exactly one newline-terminated line.
///
/// serde_json escapes control characters inside strings, so the only newline
/// in the output is the terminator.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
