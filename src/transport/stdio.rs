//! Standard I/O transport using newline-delimited JSON framing.
//!
//! The primary transport for MCP servers running as a subprocess. Outgoing
//! messages are written as one line of JSON followed by `\n`; incoming bytes
//! are accumulated in a [`ReadBuffer`] and parsed one message per newline,
//! regardless of how the stream is chunked.

use crate::error::{TransportError, TransportResult};
use crate::protocol::Message;
use crate::transport::{
    CloseHandler, ErrorHandler, MessageHandler, Transport, TransportCallbacks,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stdin, Stdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Buffers a continuous byte stream into discrete JSON-RPC messages.
///
/// A message may arrive split across arbitrary byte boundaries, including
/// inside JSON strings; exactly one parsed message is emitted per
/// terminating `\n`.
#[derive(Default)]
pub struct ReadBuffer {
    buffer: Vec<u8>,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk of data to the buffer.
    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Reads one complete message from the buffer, or `None` if no
    /// terminating newline has arrived yet. Empty lines are skipped.
    pub fn read_message(&mut self) -> TransportResult<Option<Message>> {
        loop {
            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };

            let line: Vec<u8> = self.buffer.drain(..=newline).take(newline).collect();
            let line = match std::str::from_utf8(&line) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e,
                    )))
                }
            };
            if line.is_empty() {
                continue;
            }

            trace!(len = line.len(), "received line");
            return Ok(Some(serde_json::from_str(line)?));
        }
    }

    /// Discards any buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Stdio transport generic over the reader and writer, so pipes to a child
/// process and in-memory buffers reuse the same implementation.
pub struct StdioTransport<R = Stdin, W = Stdout> {
    reader: Mutex<Option<R>>,
    writer: Arc<Mutex<W>>,
    callbacks: Arc<TransportCallbacks>,
    started: AtomicBool,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl StdioTransport<Stdin, Stdout> {
    /// Creates a transport over this process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a transport over a custom reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Arc::new(Mutex::new(writer)),
            callbacks: Arc::new(TransportCallbacks::default()),
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        }
    }

    async fn read_loop(
        mut reader: R,
        callbacks: Arc<TransportCallbacks>,
        closed: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) {
        let mut buffer = ReadBuffer::new();
        let mut chunk = [0u8; 4096];

        loop {
            let read = tokio::select! {
                read = reader.read(&mut chunk) => read,
                _ = shutdown.cancelled() => return,
            };

            let n = match read {
                Ok(0) => {
                    debug!("EOF on transport reader");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("transport read error: {e}");
                    callbacks.on_error(TransportError::Io(e));
                    break;
                }
            };

            buffer.append(&chunk[..n]);
            loop {
                match buffer.read_message() {
                    Ok(Some(message)) => callbacks.on_message(message),
                    Ok(None) => break,
                    // Malformed frame: report and keep reading the stream.
                    Err(e) => callbacks.on_error(e),
                }
            }
        }

        if !closed.swap(true, Ordering::SeqCst) {
            callbacks.on_close();
        }
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn start(&self) -> TransportResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        tokio::spawn(Self::read_loop(
            reader,
            Arc::clone(&self.callbacks),
            Arc::clone(&self.closed),
            self.shutdown.clone(),
        ));
        Ok(())
    }

    async fn send(&self, message: &Message) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        // Single write under the lock keeps concurrent sends atomic.
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.flush().await;
        drop(writer);
        self.callbacks.on_close();
        Ok(())
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        self.callbacks.set_message(handler);
    }

    fn set_error_handler(&self, handler: ErrorHandler) {
        self.callbacks.set_error(handler);
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        self.callbacks.set_close(handler);
    }
}
