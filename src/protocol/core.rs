//! Protocol core: JSON-RPC framing and correlation over a pluggable
//! transport, independent of MCP semantics.
//!
//! Handles request/response linking, notifications, progress updates and
//! cancellation. Inbound requests and notifications are dispatched on their
//! own tasks so a slow handler never stalls the transport read path.

use crate::error::{McpError, ProtocolError, ProtocolResult, Result};
use crate::protocol::types::{
    CancelledParams, JsonRpcError, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, Message, Progress, ProgressParams, RequestId,
};
use crate::transport::Transport;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra data given to request handlers.
#[derive(Clone)]
pub struct RequestHandlerExtra {
    /// Cancelled when the peer sends `notifications/cancelled` for this
    /// request or the connection closes.
    pub cancellation: CancellationToken,
}

/// Handler for inbound requests, keyed by method.
pub type RequestHandler = Arc<
    dyn Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, ProtocolResult<Value>>
        + Send
        + Sync,
>;

/// Handler for inbound notifications, keyed by method.
pub type NotificationHandler =
    Arc<dyn Fn(JsonRpcNotification) -> BoxFuture<'static, ProtocolResult<()>> + Send + Sync>;

/// Callback for `$/progress` updates on an outbound request.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Callback invoked when the connection closes for any reason.
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked for asynchronous errors.
pub type ErrorCallback = Arc<dyn Fn(McpError) + Send + Sync>;

/// Per-request options.
#[derive(Default)]
pub struct RequestOptions {
    /// Called when progress notifications arrive for this request. Setting
    /// this attaches `_meta.progressToken` to the outgoing params.
    pub on_progress: Option<ProgressCallback>,
    /// Cancels the in-flight request when triggered.
    pub cancel: Option<CancellationToken>,
    /// Per-request timeout; zero means [`DEFAULT_REQUEST_TIMEOUT`].
    pub timeout: Duration,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// All correlation state, guarded by one reader-writer lock. The lock is
/// never held across an await or a user callback.
#[derive(Default)]
struct HandlerTables {
    request: HashMap<String, RequestHandler>,
    notification: HashMap<String, NotificationHandler>,
    response: HashMap<i64, oneshot::Sender<ProtocolResult<Value>>>,
    progress: HashMap<i64, ProgressCallback>,
    cancellers: HashMap<RequestId, CancellationToken>,
    fallback_request: Option<RequestHandler>,
    fallback_notification: Option<NotificationHandler>,
}

struct ProtocolInner {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    closed: AtomicBool,
    next_request_id: AtomicI64,
    tables: RwLock<HandlerTables>,
    on_close: RwLock<Option<CloseCallback>>,
    on_error: RwLock<Option<ErrorCallback>>,
}

/// MCP protocol framing on top of a pluggable transport, with
/// request/response linking, notifications, progress and cancellation.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<ProtocolInner>,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol {
    /// Creates a protocol instance with the default `ping`,
    /// `notifications/cancelled` and `$/progress` handlers installed.
    pub fn new() -> Self {
        let protocol = Self {
            inner: Arc::new(ProtocolInner {
                transport: RwLock::new(None),
                closed: AtomicBool::new(false),
                next_request_id: AtomicI64::new(0),
                tables: RwLock::new(HandlerTables::default()),
                on_close: RwLock::new(None),
                on_error: RwLock::new(None),
            }),
        };

        protocol.set_request_handler("ping", |_request, _extra| {
            Box::pin(async { Ok(json!({})) })
        });

        let weak = Arc::downgrade(&protocol.inner);
        protocol.set_notification_handler("notifications/cancelled", move |notification| {
            let weak = weak.clone();
            Box::pin(async move { ProtocolInner::handle_cancelled(weak, notification) })
        });

        let weak = Arc::downgrade(&protocol.inner);
        protocol.set_notification_handler("$/progress", move |notification| {
            let weak = weak.clone();
            Box::pin(async move { ProtocolInner::handle_progress(weak, notification) })
        });

        protocol
    }

    /// Attaches to the given transport, wires the message/error/close
    /// callbacks and starts it.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::NotConnected.into());
        }
        *self.inner.transport.write() = Some(Arc::clone(&transport));

        let weak = Arc::downgrade(&self.inner);
        transport.set_message_handler(Arc::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                ProtocolInner::handle_message(&inner, message);
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        transport.set_error_handler(Arc::new(move |error| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_error(error.into());
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        transport.set_close_handler(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_close();
            }
        }));

        transport.start().await?;
        Ok(())
    }

    /// Sends a request and waits until the response arrives, the request is
    /// cancelled, the timeout elapses or the connection closes.
    ///
    /// On cancellation or timeout a `notifications/cancelled` notification is
    /// sent to the peer before returning. The returned value is the raw JSON
    /// of the response's `result` field.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> ProtocolResult<Value> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) || inner.transport.read().is_none() {
            return Err(ProtocolError::NotConnected);
        }

        let id = inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (sender, mut receiver) = oneshot::channel();
        {
            let mut tables = inner.tables.write();
            tables.response.insert(id, sender);
            if let Some(callback) = &options.on_progress {
                tables.progress.insert(id, Arc::clone(callback));
            }
        }

        let cleanup = || {
            let mut tables = inner.tables.write();
            tables.response.remove(&id);
            tables.progress.remove(&id);
        };

        // When progress is requested the caller's id doubles as the progress
        // token and is merged into the params, which must then be an object.
        let params = if options.on_progress.is_some() {
            match params {
                None => Some(json!({ "_meta": { "progressToken": id } })),
                Some(Value::Object(mut map)) => {
                    map.insert("_meta".into(), json!({ "progressToken": id }));
                    Some(Value::Object(map))
                }
                Some(_) => {
                    cleanup();
                    return Err(ProtocolError::InvalidParams(
                        "params must be an object when requesting progress".into(),
                    ));
                }
            }
        } else {
            params
        };

        let mut request = JsonRpcRequest::new(id, method);
        request.params = params;
        if let Err(e) = inner.send_message(Message::Request(request)).await {
            cleanup();
            return Err(e);
        }

        let timeout = if options.timeout.is_zero() {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            options.timeout
        };
        let cancel = options.cancel.unwrap_or_default();

        tokio::select! {
            outcome = &mut receiver => {
                cleanup();
                match outcome {
                    Ok(envelope) => envelope,
                    Err(_) => Err(ProtocolError::ConnectionClosed),
                }
            }
            _ = cancel.cancelled() => {
                inner.send_cancel_notification(id, "request cancelled").await;
                cleanup();
                Err(ProtocolError::RequestCancelled("request cancelled".into()))
            }
            _ = tokio::time::sleep(timeout) => {
                inner.send_cancel_notification(id, "request timeout").await;
                cleanup();
                Err(ProtocolError::RequestTimeout(timeout))
            }
        }
    }

    /// Emits a one-way notification.
    pub async fn notification(&self, method: &str, params: Option<Value>) -> ProtocolResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) || self.inner.transport.read().is_none() {
            return Err(ProtocolError::NotConnected);
        }
        let mut notification = JsonRpcNotification::new(method);
        notification.params = params;
        self.inner
            .send_message(Message::Notification(notification))
            .await
    }

    /// Closes the transport and wakes every pending request with
    /// `connection closed`. Further calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let transport = self.inner.transport.read().clone();
        match transport {
            // The transport's close callback runs the rest of the teardown.
            Some(transport) => transport.close().await?,
            None => self.inner.handle_close(),
        }
        Ok(())
    }

    /// Registers a handler for inbound requests with the given method,
    /// replacing any previous one.
    pub fn set_request_handler<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, ProtocolResult<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .tables
            .write()
            .request
            .insert(method.into(), Arc::new(handler));
    }

    /// Removes the request handler for the given method.
    pub fn remove_request_handler(&self, method: &str) {
        self.inner.tables.write().request.remove(method);
    }

    /// Registers a handler for inbound notifications with the given method,
    /// replacing any previous one.
    pub fn set_notification_handler<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(JsonRpcNotification) -> BoxFuture<'static, ProtocolResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .tables
            .write()
            .notification
            .insert(method.into(), Arc::new(handler));
    }

    /// Removes the notification handler for the given method.
    pub fn remove_notification_handler(&self, method: &str) {
        self.inner.tables.write().notification.remove(method);
    }

    /// Handler invoked for request methods that have no handler installed.
    pub fn set_fallback_request_handler<F>(&self, handler: F)
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, ProtocolResult<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.tables.write().fallback_request = Some(Arc::new(handler));
    }

    /// Handler invoked for notification methods that have no handler installed.
    pub fn set_fallback_notification_handler<F>(&self, handler: F)
    where
        F: Fn(JsonRpcNotification) -> BoxFuture<'static, ProtocolResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.tables.write().fallback_notification = Some(Arc::new(handler));
    }

    /// Callback invoked once when the connection closes.
    pub fn set_on_close(&self, callback: CloseCallback) {
        *self.inner.on_close.write() = Some(callback);
    }

    /// Callback invoked for asynchronous errors.
    pub fn set_on_error(&self, callback: ErrorCallback) {
        *self.inner.on_error.write() = Some(callback);
    }
}

impl ProtocolInner {
    fn handle_message(inner: &Arc<Self>, message: Message) {
        match message {
            Message::Request(request) => Self::handle_request(inner, request),
            Message::Notification(notification) => Self::handle_notification(inner, notification),
            Message::Response(response) => {
                inner.deliver_response(&response.id, Ok(response.result));
            }
            Message::Error(response) => {
                inner.deliver_response(
                    &response.id,
                    Err(ProtocolError::Rpc {
                        code: response.error.code,
                        message: response.error.message,
                    }),
                );
            }
        }
    }

    fn handle_request(inner: &Arc<Self>, request: JsonRpcRequest) {
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let handler = {
            let tables = inner.tables.read();
            tables
                .request
                .get(&request.method)
                .cloned()
                .or_else(|| tables.fallback_request.clone())
        };

        let Some(handler) = handler else {
            debug!(method = %request.method, "no handler for request");
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let error = JsonRpcError::method_not_found(&request.method);
                inner.send_error_response(request.id, error).await;
            });
            return;
        };

        // The canceller is registered before the handler runs so that a
        // racing notifications/cancelled always finds it.
        let id = request.id.clone();
        let token = CancellationToken::new();
        inner
            .tables
            .write()
            .cancellers
            .insert(id.clone(), token.clone());

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let extra = RequestHandlerExtra {
                cancellation: token,
            };
            let result = handler(request, extra).await;
            inner.tables.write().cancellers.remove(&id);

            match result {
                Ok(value) => {
                    inner
                        .send_message(Message::Response(JsonRpcResponse::new(id, value)))
                        .await
                        .ok();
                }
                Err(e) => {
                    inner
                        .send_error_response(id, JsonRpcError::new(e.code(), e.to_string()))
                        .await;
                }
            }
        });
    }

    fn handle_notification(inner: &Arc<Self>, notification: JsonRpcNotification) {
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let handler = {
            let tables = inner.tables.read();
            tables
                .notification
                .get(&notification.method)
                .cloned()
                .or_else(|| tables.fallback_notification.clone())
        };

        let Some(handler) = handler else {
            return;
        };

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            if let Err(e) = handler(notification).await {
                inner.handle_error(McpError::Internal {
                    message: format!("notification handler error: {e}").into(),
                });
            }
        });
    }

    fn handle_cancelled(weak: Weak<Self>, notification: JsonRpcNotification) -> ProtocolResult<()> {
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        let params: CancelledParams =
            serde_json::from_value(notification.params.unwrap_or(Value::Null))
                .map_err(|e| ProtocolError::InvalidParams(e.to_string().into()))?;

        let canceller = inner.tables.read().cancellers.get(&params.request_id).cloned();
        if let Some(canceller) = canceller {
            debug!(id = %params.request_id, "cancelling inbound request");
            canceller.cancel();
        }
        Ok(())
    }

    fn handle_progress(weak: Weak<Self>, notification: JsonRpcNotification) -> ProtocolResult<()> {
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        let params: ProgressParams =
            serde_json::from_value(notification.params.unwrap_or(Value::Null))
                .map_err(|e| ProtocolError::InvalidParams(e.to_string().into()))?;

        // Best-effort: progress arriving after completion finds no callback
        // and is dropped.
        let callback = inner.tables.read().progress.get(&params.progress_token).cloned();
        if let Some(callback) = callback {
            callback(Progress {
                progress: params.progress,
                total: params.total,
            });
        }
        Ok(())
    }

    fn deliver_response(&self, id: &RequestId, envelope: ProtocolResult<Value>) {
        let RequestId::Number(id) = id else {
            warn!(%id, "response with non-numeric id has no waiter");
            return;
        };
        let sender = self.tables.write().response.remove(id);
        match sender {
            // The waiting request() call wakes exactly once.
            Some(sender) => {
                sender.send(envelope).ok();
            }
            None => debug!(id, "dropping response with no pending request"),
        }
    }

    async fn send_message(&self, message: Message) -> ProtocolResult<()> {
        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            return Err(ProtocolError::NotConnected);
        };
        transport.send(&message).await.map_err(|e| match e {
            crate::error::TransportError::Closed => ProtocolError::ConnectionClosed,
            other => ProtocolError::InternalError(format!("failed to send: {other}").into()),
        })
    }

    async fn send_error_response(&self, id: RequestId, error: JsonRpcError) {
        let response = Message::Error(JsonRpcErrorResponse::new(id, error));
        if let Err(e) = self.send_message(response).await {
            self.handle_error(McpError::Internal {
                message: format!("failed to send error response: {e}").into(),
            });
        }
    }

    async fn send_cancel_notification(&self, request_id: i64, reason: &str) {
        let notification = JsonRpcNotification::new("notifications/cancelled")
            .with_params(json!({ "requestId": request_id, "reason": reason }));
        if let Err(e) = self.send_message(Message::Notification(notification)).await {
            self.handle_error(McpError::Internal {
                message: format!("failed to send cancel notification: {e}").into(),
            });
        }
    }

    fn handle_error(&self, error: McpError) {
        let callback = self.on_error.read().clone();
        match callback {
            Some(callback) => callback(error),
            None => debug!("protocol error: {error}"),
        }
    }

    /// Tears down all correlation state; runs at most once.
    fn handle_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing protocol");

        let (waiters, cancellers) = {
            let mut tables = self.tables.write();
            tables.request.clear();
            tables.notification.clear();
            tables.progress.clear();
            tables.fallback_request = None;
            tables.fallback_notification = None;
            (
                std::mem::take(&mut tables.response),
                std::mem::take(&mut tables.cancellers),
            )
        };

        for (_, canceller) in cancellers {
            canceller.cancel();
        }
        for (_, waiter) in waiters {
            waiter.send(Err(ProtocolError::ConnectionClosed)).ok();
        }

        let callback = self.on_close.read().clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}
