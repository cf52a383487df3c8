//! Server-Sent Events transport framing.
//!
//! Server-to-client messages are written as SSE frames
//! (`event: <name>\ndata: <payload>\n\n`) to a response-body writer supplied
//! by the embedding HTTP stack; client-to-server messages arrive as HTTP
//! POST bodies handed to [`SseServerTransport::handle_post_message`]. The
//! HTTP server itself (routing, headers, flushing) stays outside this crate.
//!
//! On start the transport emits an `endpoint` event whose data is
//! `<endpoint>?sessionId=<uuid>`; every subsequent protocol message goes out
//! as a `message` event.

use crate::error::{TransportError, TransportResult};
use crate::protocol::Message;
use crate::transport::{
    CloseHandler, ErrorHandler, MessageHandler, Transport, TransportCallbacks,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Maximum accepted POST body size: 4 MiB.
pub const MAX_SSE_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Server-side SSE transport over a generic response-body writer.
pub struct SseServerTransport<W> {
    endpoint: String,
    session_id: String,
    writer: Mutex<W>,
    callbacks: TransportCallbacks,
    started: AtomicBool,
    closed: AtomicBool,
}

impl<W> SseServerTransport<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a transport that will emit SSE frames for the given message
    /// endpoint into `writer`.
    pub fn new(endpoint: impl Into<String>, writer: W) -> Self {
        Self {
            endpoint: endpoint.into(),
            session_id: Uuid::new_v4().to_string(),
            writer: Mutex::new(writer),
            callbacks: TransportCallbacks::default(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The unique session identifier for this connection.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Processes one inbound HTTP POST carrying a single JSON-RPC message.
    ///
    /// `method` and `content_type` come from the HTTP request. Rejects
    /// non-POST methods, non-JSON content types and bodies over
    /// [`MAX_SSE_MESSAGE_SIZE`]; parse failures are reported to the error
    /// handler and returned.
    pub fn handle_post_message(
        &self,
        method: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> TransportResult<()> {
        if !method.eq_ignore_ascii_case("POST") {
            return Err(TransportError::MethodNotAllowed(method.to_string()));
        }
        let is_json = content_type
            .map(|ct| ct.split(';').next().unwrap_or("").trim() == "application/json")
            .unwrap_or(false);
        if !is_json {
            return Err(TransportError::UnsupportedContentType(
                content_type.unwrap_or("").to_string(),
            ));
        }
        if body.len() > MAX_SSE_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge(body.len()));
        }

        let message: Message = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                let detail = e.to_string();
                self.callbacks.on_error(TransportError::Malformed(e));
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    detail,
                )));
            }
        };

        self.callbacks.on_message(message);
        Ok(())
    }

    async fn write_event(&self, event: &str, data: &str) -> TransportResult<()> {
        let frame = format!("event: {event}\ndata: {data}\n\n");
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W> Transport for SseServerTransport<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn start(&self) -> TransportResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        let endpoint_url = format!("{}?sessionId={}", self.endpoint, self.session_id);
        debug!(session = %self.session_id, "starting SSE stream");
        self.write_event("endpoint", &endpoint_url).await
    }

    async fn send(&self, message: &Message) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let data = serde_json::to_string(message)?;
        self.write_event("message", &data).await
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
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
