//! In-memory duplex transport.
//!
//! A pair of connected transports backed by unbounded channels. Useful for
//! wiring a client and server inside one process and as the test double for
//! everything above the transport contract.

use crate::error::{TransportError, TransportResult};
use crate::protocol::Message;
use crate::transport::{
    CloseHandler, ErrorHandler, MessageHandler, Transport, TransportCallbacks,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One end of an in-memory transport pair.
pub struct ChannelTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    callbacks: Arc<TransportCallbacks>,
    started: AtomicBool,
    closed: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Creates two connected transports; messages sent on one side are
    /// delivered, in order, to the other side's message handler.
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (Self::endpoint(left_tx, right_rx), Self::endpoint(right_tx, left_rx))
    }

    fn endpoint(
        outbound: mpsc::UnboundedSender<Message>,
        inbound: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: Mutex::new(Some(inbound)),
            callbacks: Arc::new(TransportCallbacks::default()),
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn start(&self) -> TransportResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        let mut inbound = self
            .inbound
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        let callbacks = Arc::clone(&self.callbacks);
        let closed = Arc::clone(&self.closed);

        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                callbacks.on_message(message);
            }
            // Peer hung up (or we closed): fire the close callback once.
            if !closed.swap(true, Ordering::SeqCst) {
                callbacks.on_close();
            }
        });
        Ok(())
    }

    async fn send(&self, message: &Message) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let sender = self.outbound.lock().clone();
        let Some(sender) = sender else {
            return Err(TransportError::Closed);
        };
        sender
            .send(message.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the sender lets the peer's read task observe the hangup.
        self.outbound.lock().take();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcRequest;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (left, right) = ChannelTransport::pair();
        let sink: Arc<StdMutex<Vec<Message>>> = Arc::new(StdMutex::new(Vec::new()));
        let clone = Arc::clone(&sink);
        right.set_message_handler(Arc::new(move |msg| clone.lock().unwrap().push(msg)));
        right.start().await.unwrap();

        for i in 0..3 {
            left.send(&Message::Request(JsonRpcRequest::new(i, format!("m{i}"))))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let messages = sink.lock().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].method(), Some("m0"));
        assert_eq!(messages[2].method(), Some("m2"));
    }

    #[tokio::test]
    async fn test_close_propagates_to_peer() {
        let (left, right) = ChannelTransport::pair();
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        right.set_close_handler(Arc::new(move || {
            flag.store(true, Ordering::SeqCst);
        }));
        right.start().await.unwrap();

        left.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(closed.load(Ordering::SeqCst));
        assert!(right
            .send(&Message::Request(JsonRpcRequest::new(1, "ping")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_double_close_is_noop() {
        let (left, _right) = ChannelTransport::pair();
        let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        left.set_close_handler(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        left.close().await.unwrap();
        left.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
