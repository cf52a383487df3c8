//! Pluggable transports carrying framed JSON-RPC messages.
//!
//! A transport is an abstract bidirectional channel. It delivers inbound
//! messages to the registered message handler in wire order, one message per
//! invocation, surfaces malformed frames through the error handler while
//! continuing to read, and fires the close handler exactly once.

pub mod channel;
pub mod sse;
pub mod stdio;

use crate::error::TransportResult;
use crate::protocol::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

pub use channel::ChannelTransport;
pub use sse::{SseServerTransport, MAX_SSE_MESSAGE_SIZE};
pub use stdio::{ReadBuffer, StdioTransport};

/// Callback invoked for every inbound message, in wire order.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Callback invoked for transport errors (malformed frames, I/O failures).
pub type ErrorHandler = Arc<dyn Fn(crate::error::TransportError) + Send + Sync>;

/// Callback invoked exactly once when the transport closes.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Abstract bidirectional framed-message channel.
///
/// Implementations may be called from any task; they synchronize their own
/// state. Callback setters replace the previous callback, never compose.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begins reading from the underlying channel. Calling `start` a second
    /// time fails with [`crate::error::TransportError::AlreadyStarted`].
    async fn start(&self) -> TransportResult<()>;

    /// Serializes one message and delivers it atomically, with no
    /// interleaving between concurrent sends.
    async fn send(&self, message: &Message) -> TransportResult<()>;

    /// Releases resources and invokes the close callback exactly once.
    /// Closing an already-closed transport is a no-op.
    async fn close(&self) -> TransportResult<()>;

    fn set_message_handler(&self, handler: MessageHandler);

    fn set_error_handler(&self, handler: ErrorHandler);

    fn set_close_handler(&self, handler: CloseHandler);
}

/// Shared callback storage used by the transport implementations.
#[derive(Default)]
pub(crate) struct TransportCallbacks {
    message: Mutex<Option<MessageHandler>>,
    error: Mutex<Option<ErrorHandler>>,
    close: Mutex<Option<CloseHandler>>,
}

impl TransportCallbacks {
    pub(crate) fn set_message(&self, handler: MessageHandler) {
        *self.message.lock() = Some(handler);
    }

    pub(crate) fn set_error(&self, handler: ErrorHandler) {
        *self.error.lock() = Some(handler);
    }

    pub(crate) fn set_close(&self, handler: CloseHandler) {
        *self.close.lock() = Some(handler);
    }

    pub(crate) fn on_message(&self, message: Message) {
        let handler = self.message.lock().clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }

    pub(crate) fn on_error(&self, error: crate::error::TransportError) {
        let handler = self.error.lock().clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }

    pub(crate) fn on_close(&self) {
        let handler = self.close.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}
