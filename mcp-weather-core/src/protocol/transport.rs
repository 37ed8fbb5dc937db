//! JSONL framing over `AsyncBufRead`/`AsyncWrite`.
//!
//! Generic over reader and writer so the same type serves the server on
//! stdio, the client on a child's pipes, and tests on in-memory duplexes.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub struct JsonlTransport<R, W> {
    reader: R,
    /// `None` once the write side has been closed.
    writer: Option<W>,
    /// Bytes of a line not yet terminated. Kept across calls so a read
    /// cancelled mid-line resumes where it stopped.
    pending: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin> JsonlTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer: Some(writer),
            pending: Vec::new(),
        }
    }

    /// Next non-blank line, trimmed. `Ok(None)` on EOF.
    ///
    /// Cancel-safe: dropping the future loses no input.
    pub async fn read_line(&mut self) -> Result<Option<String>, std::io::Error> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;
            if read == 0 && self.pending.is_empty() {
                return Ok(None);
            }

            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if read == 0 {
                    return Ok(None);
                }
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }

    /// Read and decode the next frame. `Ok(None)` on EOF.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        match self.read_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }

    /// Write one value as a single flushed line.
    pub async fn write_frame<T: Serialize>(&mut self, frame: &T) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "write side closed")
        })?;
        let mut json = serde_json::to_string(frame)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Flush and drop the write half so the peer observes EOF.
    pub async fn close_writer(&mut self) -> Result<(), TransportError> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}
