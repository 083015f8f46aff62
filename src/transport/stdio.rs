use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin,
    Stdout,
};
use tracing::debug;

use super::{Transport, TransportKind};
use crate::errors::TransportError;
use crate::mcp::rpc::{Request, Response};

/// Maximum bytes per newline-delimited message (1 MiB).
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Sequential transport over a newline-delimited JSON stream.
///
/// Only one request is in flight at a time, so responses are written in the
/// order requests were read and no correlation state is kept.
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
    buffer: Vec<u8>,
}

impl StdioTransport<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            buffer: Vec::new(),
        }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn start(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn read_request(&mut self) -> Result<Option<Request>, TransportError> {
        loop {
            self.buffer.clear();
            let read = (&mut self.reader)
                .take(MAX_MESSAGE_BYTES as u64 + 1)
                .read_until(b'\n', &mut self.buffer)
                .await?;
            if read == 0 {
                return Ok(None);
            }

            if read > MAX_MESSAGE_BYTES {
                let skipped = if self.buffer.ends_with(b"\n") {
                    0
                } else {
                    discard_line(&mut self.reader).await?
                };
                self.buffer = Vec::new();
                return Err(TransportError::MessageTooLarge {
                    size: read + skipped,
                    limit: MAX_MESSAGE_BYTES,
                });
            }

            if self.buffer.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let request: Request =
                serde_json::from_slice(&self.buffer).map_err(TransportError::Decode)?;
            debug!(method = %request.method, id = ?request.id, "received request");
            return Ok(Some(request));
        }
    }

    async fn write_response(&mut self, response: Response) -> Result<(), TransportError> {
        let mut encoded = serde_json::to_vec(&response).map_err(TransportError::Encode)?;
        encoded.push(b'\n');
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;
        debug!(id = ?response.id, has_error = response.is_error(), "sent response");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Consumes the rest of the current line without buffering it.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(skipped);
        }
        let (used, line_done) = match available.iter().position(|byte| *byte == b'\n') {
            Some(newline) => (newline + 1, true),
            None => (available.len(), false),
        };
        reader.consume(used);
        skipped += used;
        if line_done {
            return Ok(skipped);
        }
    }
}
