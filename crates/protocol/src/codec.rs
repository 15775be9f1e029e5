use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::Envelope;
use crate::error::ProtocolError;

/// Default cap on a single line's byte length before [`ProtocolError::LineTooLong`] fires.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1 << 20;

const READ_CHUNK: usize = 4096;

/// Serializes an envelope to a single JSON line (no trailing newline).
pub fn encode_line(envelope: &Envelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(ProtocolError::Encode)
}

/// Parses one line (without its trailing newline) as an envelope.
pub fn decode_line(line: &str) -> Result<Envelope, ProtocolError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    serde_json::from_str(line).map_err(|source| ProtocolError::Decode {
        line: line.to_string(),
        source,
    })
}

/// Reads newline-delimited lines off an async byte stream without ever buffering past
/// `max_line_bytes` before noticing — the byte budget is enforced incrementally, chunk by
/// chunk, rather than only after a whole unbounded line has already been accumulated.
pub struct LineReader<R> {
    inner: R,
    max_line_bytes: usize,
    buf: Vec<u8>,
    chunk: [u8; READ_CHUNK],
    /// Bytes already read past `max_line_bytes` for the line currently being discarded.
    overflowing: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_line_bytes(inner, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            max_line_bytes,
            buf: Vec::new(),
            chunk: [0u8; READ_CHUNK],
            overflowing: false,
        }
    }

    /// Reads the next raw line (UTF-8 validated, trailing `\n`/`\r\n` stripped).
    ///
    /// Returns `Ok(None)` on clean EOF with no partial line pending. A line longer than
    /// `max_line_bytes` yields `Err(ProtocolError::LineTooLong)`; the reader keeps discarding
    /// bytes up to the next newline and remains usable for the next call.
    pub async fn read_line(&mut self) -> Result<Option<String>, ProtocolError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                if !self.overflowing && pos > self.max_line_bytes {
                    self.buf.drain(..=pos);
                    return Err(ProtocolError::LineTooLong {
                        limit: self.max_line_bytes,
                    });
                }
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // drop '\n'
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if self.overflowing {
                    self.overflowing = false;
                    return Err(ProtocolError::LineTooLong {
                        limit: self.max_line_bytes,
                    });
                }
                let text = String::from_utf8_lossy(&line).into_owned();
                return Ok(Some(text));
            }

            if !self.overflowing && self.buf.len() > self.max_line_bytes {
                self.overflowing = true;
                self.buf.clear();
            }

            let n = self
                .inner
                .read(&mut self.chunk)
                .await
                .map_err(ProtocolError::Io)?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // Unterminated trailing line at EOF: treat it like a complete line.
                let line = std::mem::take(&mut self.buf);
                if self.overflowing {
                    self.overflowing = false;
                    return Err(ProtocolError::LineTooLong {
                        limit: self.max_line_bytes,
                    });
                }
                let text = String::from_utf8_lossy(&line).into_owned();
                return Ok(Some(text));
            }

            if !self.overflowing {
                self.buf.extend_from_slice(&self.chunk[..n]);
            }
        }
    }
}

/// Writes one envelope per line, flushing after every write so partial writes never linger
/// in a kernel/process buffer while a peer blocks waiting for a response.
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_envelope(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let mut line = encode_line(envelope)?;
        line.push('\n');
        self.inner
            .write_all(line.as_bytes())
            .await
            .map_err(ProtocolError::Io)?;
        self.inner.flush().await.map_err(ProtocolError::Io)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
