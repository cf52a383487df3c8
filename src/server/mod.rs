//! MCP server: capability registries and method dispatch.
//!
//! A [`Server`] owns three keyed registries (tools, prompts, resources),
//! each binding a user-supplied typed handler to a schema derived from the
//! handler's argument type. `serve()` installs the MCP request handlers on
//! the protocol core and connects the transport; registry mutations on a
//! running server emit `list_changed` notifications.

pub mod registry;

use crate::content::{
    CallToolResult, GetPromptResult, PromptResponse, ReadResourceResult, ResourceResponse,
    ToolResponse,
};
use crate::error::{McpError, ProtocolError, ProtocolResult, Result};
use crate::protocol::{
    CallToolParams, GetPromptParams, Implementation, InitializeResult, JsonRpcRequest,
    ListParams, ListPromptsResult, ListResourcesResult, ListToolsResult, Prompt, Protocol,
    ReadResourceParams, ResourceDescriptor, ServerCapabilities, Tool, MCP_VERSION,
};
use crate::schema;
use crate::transport::Transport;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use registry::Registry;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

type ToolHandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, CallToolResult> + Send + Sync>;
type PromptHandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, GetPromptResult> + Send + Sync>;
type ResourceHandlerFn = Arc<dyn Fn() -> BoxFuture<'static, ReadResourceResult> + Send + Sync>;

/// A registered tool: its advertised definition plus the decode-and-invoke
/// wrapper around the user handler.
#[derive(Clone)]
struct RegisteredTool {
    definition: Tool,
    handler: ToolHandlerFn,
}

#[derive(Clone)]
struct RegisteredPrompt {
    definition: Prompt,
    handler: PromptHandlerFn,
}

#[derive(Clone)]
struct RegisteredResource {
    descriptor: ResourceDescriptor,
    handler: ResourceHandlerFn,
}

/// Server lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLifecycle {
    /// Created but not serving; `list_changed` notifications are suppressed.
    Idle,
    /// Connected and dispatching.
    Running,
    /// Shut down.
    Stopped,
}

struct ServerInner {
    protocol: Protocol,
    transport: Arc<dyn Transport>,
    info: Implementation,
    instructions: Option<String>,
    pagination_limit: Option<usize>,
    tools: Registry<RegisteredTool>,
    prompts: Registry<RegisteredPrompt>,
    resources: Registry<RegisteredResource>,
    lifecycle: RwLock<ServerLifecycle>,
}

/// MCP server. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Creates a server with default options over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ServerBuilder::new().build(transport)
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> ServerLifecycle {
        *self.inner.lifecycle.read()
    }

    /// The protocol core this server dispatches through.
    pub fn protocol(&self) -> &Protocol {
        &self.inner.protocol
    }

    /// Registers a tool under `name`, deriving its input schema from the
    /// handler's argument type. Re-registering the same name replaces the
    /// previous entry. On a running server a
    /// `notifications/tools/list_changed` notification is emitted.
    pub async fn register_tool<T, F, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResponse>> + Send + 'static,
    {
        let name = name.into();
        let definition = Tool {
            name: name.clone(),
            description: Some(description.into()),
            input_schema: schema::input_schema::<T>()?,
        };

        let handler = Arc::new(handler);
        let wrapped: ToolHandlerFn = Arc::new(move |arguments: Value| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                // Decode failures stay inside the tool envelope so the peer
                // always gets a well-formed tools/call result.
                let arguments: T = match serde_json::from_value(arguments) {
                    Ok(arguments) => arguments,
                    Err(e) => return CallToolResult::error(format!("invalid arguments: {e}")),
                };
                CallToolResult::from(handler(arguments).await)
            })
        });

        debug!(tool = %name, "registering tool");
        let server = self.clone();
        self.inner
            .tools
            .register(
                name,
                RegisteredTool {
                    definition,
                    handler: wrapped,
                },
                move || async move {
                    server
                        .notify_list_changed("notifications/tools/list_changed")
                        .await;
                },
            )
            .await;
        Ok(())
    }

    /// Removes the tool under `name`, emitting a list_changed notification
    /// if something was removed on a running server.
    pub async fn deregister_tool(&self, name: &str) -> bool {
        let server = self.clone();
        self.inner
            .tools
            .deregister(name, move || async move {
                server
                    .notify_list_changed("notifications/tools/list_changed")
                    .await;
            })
            .await
    }

    /// Registers a prompt under `name`. Every field of the handler's
    /// argument type must be a string or optional string; the prompt's
    /// argument descriptors are derived from them in declaration order.
    pub async fn register_prompt<T, F, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PromptResponse>> + Send + 'static,
    {
        let name = name.into();
        let definition = Prompt {
            name: name.clone(),
            description: Some(description.into()),
            arguments: schema::prompt_arguments::<T>()?,
        };

        let handler = Arc::new(handler);
        let wrapped: PromptHandlerFn = Arc::new(move |arguments: Value| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let arguments: T = match serde_json::from_value(arguments) {
                    Ok(arguments) => arguments,
                    Err(e) => return GetPromptResult::error(format!("invalid arguments: {e}")),
                };
                match handler(arguments).await {
                    Ok(response) => GetPromptResult::success(response),
                    Err(e) => GetPromptResult::error(e.to_string()),
                }
            })
        });

        debug!(prompt = %name, "registering prompt");
        let server = self.clone();
        self.inner
            .prompts
            .register(
                name,
                RegisteredPrompt {
                    definition,
                    handler: wrapped,
                },
                move || async move {
                    server
                        .notify_list_changed("notifications/prompts/list_changed")
                        .await;
                },
            )
            .await;
        Ok(())
    }

    /// Removes the prompt under `name`.
    pub async fn deregister_prompt(&self, name: &str) -> bool {
        let server = self.clone();
        self.inner
            .prompts
            .deregister(name, move || async move {
                server
                    .notify_list_changed("notifications/prompts/list_changed")
                    .await;
            })
            .await
    }

    /// Registers a resource under `uri`. The handler takes no arguments and
    /// returns the resource contents.
    pub async fn register_resource<F, Fut>(
        &self,
        uri: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        mime_type: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResourceResponse>> + Send + 'static,
    {
        let uri = uri.into();
        let descriptor = ResourceDescriptor {
            uri: uri.clone(),
            name: name.into(),
            description: Some(description.into()),
            mime_type: Some(mime_type.into()),
            annotations: None,
        };

        let handler = Arc::new(handler);
        let wrapped: ResourceHandlerFn = Arc::new(move || {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                match handler().await {
                    Ok(response) => ReadResourceResult::success(response),
                    Err(e) => ReadResourceResult::error(e.to_string()),
                }
            })
        });

        debug!(resource = %uri, "registering resource");
        let server = self.clone();
        self.inner
            .resources
            .register(
                uri,
                RegisteredResource {
                    descriptor,
                    handler: wrapped,
                },
                move || async move {
                    server
                        .notify_list_changed("notifications/resources/list_changed")
                        .await;
                },
            )
            .await;
        Ok(())
    }

    /// Removes the resource under `uri`.
    pub async fn deregister_resource(&self, uri: &str) -> bool {
        let server = self.clone();
        self.inner
            .resources
            .deregister(uri, move || async move {
                server
                    .notify_list_changed("notifications/resources/list_changed")
                    .await;
            })
            .await
    }

    /// Installs the MCP method handlers and connects the transport,
    /// moving the server from Idle to Running.
    pub async fn serve(&self) -> Result<()> {
        if self.lifecycle() != ServerLifecycle::Idle {
            return Err(McpError::Internal {
                message: "server already started".into(),
            });
        }

        self.install_handlers();

        let server = self.clone();
        self.inner.protocol.set_on_close(Arc::new(move || {
            *server.inner.lifecycle.write() = ServerLifecycle::Stopped;
        }));

        self.inner
            .protocol
            .connect(Arc::clone(&self.inner.transport))
            .await?;
        *self.inner.lifecycle.write() = ServerLifecycle::Running;
        info!(
            "MCP server {} v{} running",
            self.inner.info.name, self.inner.info.version
        );
        Ok(())
    }

    /// Closes the protocol and transport; the server ends up Stopped.
    pub async fn close(&self) -> Result<()> {
        self.inner.protocol.close().await?;
        *self.inner.lifecycle.write() = ServerLifecycle::Stopped;
        Ok(())
    }

    fn install_handlers(&self) {
        let protocol = &self.inner.protocol;

        let server = self.clone();
        protocol.set_request_handler("initialize", move |request, _extra| {
            let server = server.clone();
            Box::pin(async move { server.handle_initialize(request) })
        });

        let server = self.clone();
        protocol.set_request_handler("tools/list", move |request, _extra| {
            let server = server.clone();
            Box::pin(async move { server.handle_list_tools(request) })
        });

        let server = self.clone();
        protocol.set_request_handler("tools/call", move |request, _extra| {
            let server = server.clone();
            Box::pin(async move { server.handle_call_tool(request).await })
        });

        let server = self.clone();
        protocol.set_request_handler("prompts/list", move |request, _extra| {
            let server = server.clone();
            Box::pin(async move { server.handle_list_prompts(request) })
        });

        let server = self.clone();
        protocol.set_request_handler("prompts/get", move |request, _extra| {
            let server = server.clone();
            Box::pin(async move { server.handle_get_prompt(request).await })
        });

        let server = self.clone();
        protocol.set_request_handler("resources/list", move |request, _extra| {
            let server = server.clone();
            Box::pin(async move { server.handle_list_resources(request) })
        });

        let server = self.clone();
        protocol.set_request_handler("resources/read", move |request, _extra| {
            let server = server.clone();
            Box::pin(async move { server.handle_read_resource(request).await })
        });
    }

    async fn notify_list_changed(&self, method: &str) {
        if self.lifecycle() != ServerLifecycle::Running {
            return;
        }
        if let Err(e) = self
            .inner
            .protocol
            .notification(method, Some(Value::Null))
            .await
        {
            warn!("failed to send {method}: {e}");
        }
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> ProtocolResult<Value> {
        if let Some(client) = request
            .params
            .as_ref()
            .and_then(|params| params.get("clientInfo"))
            .and_then(|info| serde_json::from_value::<Implementation>(info.clone()).ok())
        {
            info!("initialize request from {} v{}", client.name, client.version);
        }

        let result = InitializeResult {
            protocol_version: MCP_VERSION.into(),
            capabilities: ServerCapabilities::advertised(),
            server_info: self.inner.info.clone(),
            instructions: self.inner.instructions.clone(),
        };
        encode(&result)
    }

    fn handle_list_tools(&self, request: JsonRpcRequest) -> ProtocolResult<Value> {
        let params = decode_list_params(request.params)?;
        let page = self
            .inner
            .tools
            .page(params.cursor.as_deref(), self.inner.pagination_limit)?;
        encode(&ListToolsResult {
            tools: page.entries.into_iter().map(|t| t.definition).collect(),
            next_cursor: page.next_cursor,
        })
    }

    async fn handle_call_tool(&self, request: JsonRpcRequest) -> ProtocolResult<Value> {
        let params: CallToolParams = decode_params(request.params)?;
        debug!(tool = %params.name, "tool call");

        let tool = self
            .inner
            .tools
            .get(&params.name)
            .ok_or_else(|| ProtocolError::UnknownTool(params.name.clone()))?;

        let result = (tool.handler)(params.arguments).await;
        encode(&result)
    }

    fn handle_list_prompts(&self, request: JsonRpcRequest) -> ProtocolResult<Value> {
        let params = decode_list_params(request.params)?;
        let page = self
            .inner
            .prompts
            .page(params.cursor.as_deref(), self.inner.pagination_limit)?;
        encode(&ListPromptsResult {
            prompts: page.entries.into_iter().map(|p| p.definition).collect(),
            next_cursor: page.next_cursor,
        })
    }

    async fn handle_get_prompt(&self, request: JsonRpcRequest) -> ProtocolResult<Value> {
        let params: GetPromptParams = decode_params(request.params)?;
        debug!(prompt = %params.name, "prompt request");

        let prompt = self
            .inner
            .prompts
            .get(&params.name)
            .ok_or_else(|| ProtocolError::UnknownPrompt(params.name.clone()))?;

        let result = (prompt.handler)(params.arguments).await;
        encode(&result)
    }

    fn handle_list_resources(&self, request: JsonRpcRequest) -> ProtocolResult<Value> {
        let params = decode_list_params(request.params)?;
        let page = self
            .inner
            .resources
            .page(params.cursor.as_deref(), self.inner.pagination_limit)?;
        encode(&ListResourcesResult {
            resources: page.entries.into_iter().map(|r| r.descriptor).collect(),
            next_cursor: page.next_cursor,
        })
    }

    async fn handle_read_resource(&self, request: JsonRpcRequest) -> ProtocolResult<Value> {
        let params: ReadResourceParams = decode_params(request.params)?;
        debug!(resource = %params.uri, "resource read");

        let resource = self
            .inner
            .resources
            .get(&params.uri)
            .ok_or_else(|| ProtocolError::UnknownResource(params.uri.clone()))?;

        let result = (resource.handler)().await;
        encode(&result)
    }
}

fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> ProtocolResult<T> {
    let params = params.ok_or_else(|| ProtocolError::InvalidParams("missing params".into()))?;
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams(e.to_string().into()))
}

fn decode_list_params(params: Option<Value>) -> ProtocolResult<ListParams> {
    match params {
        None | Some(Value::Null) => Ok(ListParams::default()),
        Some(params) => serde_json::from_value(params)
            .map_err(|e| ProtocolError::InvalidParams(e.to_string().into())),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> ProtocolResult<Value> {
    serde_json::to_value(value).map_err(|e| ProtocolError::InternalError(e.to_string().into()))
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    name: String,
    version: String,
    instructions: Option<String>,
    pagination_limit: Option<usize>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            instructions: None,
            pagination_limit: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Human instructions returned from `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Maximum entries per `*/list` page. Unset means unpaginated.
    pub fn pagination_limit(mut self, limit: usize) -> Self {
        self.pagination_limit = Some(limit);
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                protocol: Protocol::new(),
                transport,
                info: Implementation {
                    name: self.name,
                    version: self.version,
                },
                instructions: self.instructions,
                pagination_limit: self.pagination_limit,
                tools: Registry::new(),
                prompts: Registry::new(),
                resources: Registry::new(),
                lifecycle: RwLock::new(ServerLifecycle::Idle),
            }),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Content, PromptMessage, Role};
    use crate::protocol::{Message, RequestId};
    use crate::transport::ChannelTransport;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Deserialize, JsonSchema)]
    struct HelloArguments {
        submitter: String,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct GreetingArguments {
        /// The title to submit.
        title: String,
        tone: Option<String>,
    }

    struct Wire {
        transport: Arc<ChannelTransport>,
        rx: mpsc::UnboundedReceiver<Message>,
        next_id: i64,
    }

    impl Wire {
        async fn recv(&mut self) -> Message {
            timeout(Duration::from_secs(1), self.rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("wire closed")
        }

        /// Sends a request and returns the matching response result,
        /// panicking on a JSON-RPC error.
        async fn call(&mut self, method: &str, params: Value) -> Value {
            match self.call_raw(method, params).await {
                Ok(result) => result,
                Err(e) => panic!("request {method} failed: {} {}", e.code, e.message),
            }
        }

        async fn call_raw(
            &mut self,
            method: &str,
            params: Value,
        ) -> std::result::Result<Value, crate::protocol::JsonRpcError> {
            let id = self.next_id;
            self.next_id += 1;
            self.transport
                .send(&Message::Request(
                    JsonRpcRequest::new(id, method).with_params(params),
                ))
                .await
                .unwrap();

            loop {
                match self.recv().await {
                    Message::Response(response) if response.id == RequestId::Number(id) => {
                        return Ok(response.result)
                    }
                    Message::Error(response) if response.id == RequestId::Number(id) => {
                        return Err(response.error)
                    }
                    _ => continue,
                }
            }
        }
    }

    async fn serve(builder: ServerBuilder) -> (Server, Wire) {
        let (near, far) = ChannelTransport::pair();
        let far = Arc::new(far);
        let (tx, rx) = mpsc::unbounded_channel();
        far.set_message_handler(Arc::new(move |message| {
            tx.send(message).ok();
        }));
        far.start().await.unwrap();

        let server = builder.build(Arc::new(near));
        server.serve().await.unwrap();
        (
            server,
            Wire {
                transport: far,
                rx,
                next_id: 0,
            },
        )
    }

    async fn register_hello(server: &Server) {
        server
            .register_tool(
                "hello",
                "Say hello to a person",
                |arguments: HelloArguments| async move {
                    Ok(ToolResponse::text(format!("Hello, {}", arguments.submitter)))
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_echo_tool_call() {
        let (server, mut wire) = serve(Server::builder()).await;
        register_hello(&server).await;
        let _notification = wire.recv().await;

        let result = wire
            .call(
                "tools/call",
                json!({"name": "hello", "arguments": {"submitter": "World"}}),
            )
            .await;
        assert_eq!(
            result,
            json!({"content": [{"type": "text", "text": "Hello, World"}], "isError": false})
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rpc_error() {
        let (server, mut wire) = serve(Server::builder()).await;
        register_hello(&server).await;
        let _notification = wire.recv().await;

        let error = wire
            .call_raw("tools/call", json!({"name": "nope", "arguments": {}}))
            .await
            .unwrap_err();
        assert_eq!(error.code, -32000);
        assert!(error.message.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_tool_handler_error_stays_in_envelope() {
        let (server, mut wire) = serve(Server::builder()).await;
        server
            .register_tool("fail", "Always fails", |_: HelloArguments| async move {
                Err::<ToolResponse, _>(McpError::handler("tool exploded"))
            })
            .await
            .unwrap();
        let _notification = wire.recv().await;

        let result = wire
            .call(
                "tools/call",
                json!({"name": "fail", "arguments": {"submitter": "x"}}),
            )
            .await;
        assert_eq!(result["isError"], json!(true));
        assert_eq!(result["content"][0]["text"], json!("tool exploded"));
    }

    #[tokio::test]
    async fn test_tool_decode_failure_stays_in_envelope() {
        let (server, mut wire) = serve(Server::builder()).await;
        register_hello(&server).await;
        let _notification = wire.recv().await;

        let result = wire
            .call(
                "tools/call",
                json!({"name": "hello", "arguments": {"submitter": 42}}),
            )
            .await;
        assert_eq!(result["isError"], json!(true));
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_tools_list_carries_derived_schema() {
        let (server, mut wire) = serve(Server::builder()).await;
        register_hello(&server).await;
        let _notification = wire.recv().await;

        let result = wire.call("tools/list", json!({})).await;
        assert_eq!(result["tools"][0]["name"], json!("hello"));
        assert_eq!(
            result["tools"][0]["description"],
            json!("Say hello to a person")
        );
        let schema = &result["tools"][0]["inputSchema"];
        assert_eq!(schema["type"], json!("object"));
        assert_eq!(schema["required"], json!(["submitter"]));
        assert_eq!(schema["properties"]["submitter"]["type"], json!("string"));
    }

    #[tokio::test]
    async fn test_empty_tools_list_is_empty_array() {
        let (_server, mut wire) = serve(Server::builder()).await;
        let result = wire.call("tools/list", json!({})).await;
        assert_eq!(result["tools"], json!([]));
        assert!(result.get("nextCursor").is_none());
    }

    #[tokio::test]
    async fn test_pagination_over_the_wire() {
        let (server, mut wire) = serve(Server::builder().pagination_limit(2)).await;
        for name in ["a", "b", "c", "d"] {
            server
                .register_tool(name, "letter tool", |_: HelloArguments| async move {
                    Ok(ToolResponse::text("ok"))
                })
                .await
                .unwrap();
            let _notification = wire.recv().await;
        }

        let page1 = wire.call("tools/list", json!({})).await;
        let names: Vec<_> = page1["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        let cursor1 = page1["nextCursor"].as_str().unwrap().to_owned();

        let page2 = wire.call("tools/list", json!({"cursor": cursor1})).await;
        let names: Vec<_> = page2["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["c", "d"]);
        let cursor2 = page2["nextCursor"].as_str().unwrap().to_owned();

        let page3 = wire.call("tools/list", json!({"cursor": cursor2})).await;
        assert_eq!(page3["tools"], json!([]));
        assert!(page3.get("nextCursor").is_none());
    }

    #[tokio::test]
    async fn test_register_and_deregister_emit_list_changed() {
        let (server, mut wire) = serve(Server::builder()).await;
        register_hello(&server).await;

        let message = wire.recv().await;
        let Message::Notification(notification) = message else {
            panic!("expected notification, got {message:?}");
        };
        assert_eq!(notification.method, "notifications/tools/list_changed");
        assert_eq!(notification.params, Some(Value::Null));

        assert!(server.deregister_tool("hello").await);
        let Message::Notification(notification) = wire.recv().await else {
            panic!("expected notification");
        };
        assert_eq!(notification.method, "notifications/tools/list_changed");

        // Deregistering something absent emits nothing; the next wire
        // message is the list response.
        assert!(!server.deregister_tool("hello").await);
        let result = wire.call("tools/list", json!({})).await;
        assert_eq!(result["tools"], json!([]));
    }

    #[tokio::test]
    async fn test_list_changed_suppressed_while_idle() {
        let (near, far) = ChannelTransport::pair();
        let far = Arc::new(far);
        let (tx, mut rx) = mpsc::unbounded_channel();
        far.set_message_handler(Arc::new(move |message| {
            tx.send(message).ok();
        }));
        far.start().await.unwrap();

        let server = Server::builder().build(Arc::new(near));
        assert_eq!(server.lifecycle(), ServerLifecycle::Idle);
        register_hello(&server).await;

        server.serve().await.unwrap();
        assert_eq!(server.lifecycle(), ServerLifecycle::Running);

        // Nothing was emitted for the idle-time registration.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reregistering_replaces_handler() {
        let (server, mut wire) = serve(Server::builder()).await;
        register_hello(&server).await;
        let _notification = wire.recv().await;

        server
            .register_tool(
                "hello",
                "Say hello, louder",
                |arguments: HelloArguments| async move {
                    Ok(ToolResponse::text(format!("HELLO, {}!", arguments.submitter)))
                },
            )
            .await
            .unwrap();
        let _notification = wire.recv().await;

        let listed = wire.call("tools/list", json!({})).await;
        assert_eq!(listed["tools"].as_array().unwrap().len(), 1);
        assert_eq!(listed["tools"][0]["description"], json!("Say hello, louder"));

        let result = wire
            .call(
                "tools/call",
                json!({"name": "hello", "arguments": {"submitter": "World"}}),
            )
            .await;
        assert_eq!(result["content"][0]["text"], json!("HELLO, World!"));
    }

    #[tokio::test]
    async fn test_prompt_flow() {
        let (server, mut wire) = serve(Server::builder()).await;
        server
            .register_prompt(
                "prompt_test",
                "This is a test prompt",
                |arguments: GreetingArguments| async move {
                    Ok(PromptResponse::new(
                        "greeting",
                        vec![PromptMessage::new(
                            Role::User,
                            Content::text(format!("Hello, {}", arguments.title)),
                        )],
                    ))
                },
            )
            .await
            .unwrap();
        let _notification = wire.recv().await;

        let listed = wire.call("prompts/list", json!({})).await;
        let prompt = &listed["prompts"][0];
        assert_eq!(prompt["name"], json!("prompt_test"));
        let arguments = prompt["arguments"].as_array().unwrap();
        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments[0]["name"], json!("title"));
        assert_eq!(arguments[0]["required"], json!(true));
        assert_eq!(arguments[1]["name"], json!("tone"));
        assert_eq!(arguments[1]["required"], json!(false));

        let result = wire
            .call(
                "prompts/get",
                json!({"name": "prompt_test", "arguments": {"title": "you"}}),
            )
            .await;
        assert_eq!(result["description"], json!("greeting"));
        assert_eq!(result["messages"][0]["content"]["text"], json!("Hello, you"));

        let error = wire
            .call_raw("prompts/get", json!({"name": "missing", "arguments": {}}))
            .await
            .unwrap_err();
        assert_eq!(error.code, -32000);
        assert!(error.message.contains("unknown prompt"));
    }

    #[tokio::test]
    async fn test_prompt_with_non_string_field_is_rejected() {
        #[derive(Deserialize, JsonSchema)]
        #[allow(dead_code)]
        struct Bad {
            count: u32,
        }

        let (near, _far) = ChannelTransport::pair();
        let server = Server::builder().build(Arc::new(near));
        let err = server
            .register_prompt("bad", "rejected", |_: Bad| async move {
                Ok(PromptResponse::new("x", vec![]))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Schema(_)));
    }

    #[tokio::test]
    async fn test_resource_flow() {
        let (server, mut wire) = serve(Server::builder()).await;
        server
            .register_resource(
                "test://resource",
                "resource_test",
                "This is a test resource",
                "application/json",
                || async move {
                    Ok(ResourceResponse::text(
                        "test://resource",
                        "This is a test resource",
                        "application/json",
                    ))
                },
            )
            .await
            .unwrap();
        let Message::Notification(notification) = wire.recv().await else {
            panic!("expected notification");
        };
        assert_eq!(notification.method, "notifications/resources/list_changed");

        let listed = wire.call("resources/list", json!({})).await;
        assert_eq!(listed["resources"][0]["uri"], json!("test://resource"));
        assert_eq!(listed["resources"][0]["name"], json!("resource_test"));
        assert_eq!(listed["resources"][0]["mimeType"], json!("application/json"));

        let result = wire
            .call("resources/read", json!({"uri": "test://resource"}))
            .await;
        assert_eq!(result["contents"][0]["uri"], json!("test://resource"));
        assert_eq!(
            result["contents"][0]["text"],
            json!("This is a test resource")
        );

        let error = wire
            .call_raw("resources/read", json!({"uri": "test://missing"}))
            .await
            .unwrap_err();
        assert_eq!(error.code, -32000);
        assert!(error.message.contains("unknown resource"));
    }

    #[tokio::test]
    async fn test_initialize_result_shape() {
        let (_server, mut wire) = serve(
            Server::builder()
                .name("test-server")
                .version("0.1.0")
                .instructions("Use the hello tool."),
        )
        .await;

        let result = wire
            .call(
                "initialize",
                json!({
                    "protocolVersion": MCP_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0"}
                }),
            )
            .await;
        assert_eq!(result["protocolVersion"], json!(MCP_VERSION));
        assert_eq!(result["serverInfo"]["name"], json!("test-server"));
        assert_eq!(result["serverInfo"]["version"], json!("0.1.0"));
        assert_eq!(result["instructions"], json!("Use the hello tool."));
        assert_eq!(result["capabilities"]["tools"]["listChanged"], json!(true));
        assert_eq!(result["capabilities"]["prompts"]["listChanged"], json!(true));
        assert_eq!(
            result["capabilities"]["resources"]["listChanged"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn test_ping_is_idempotent() {
        let (_server, mut wire) = serve(Server::builder()).await;
        for _ in 0..3 {
            let result = wire.call("ping", json!({})).await;
            assert_eq!(result, json!({}));
        }
    }

    #[tokio::test]
    async fn test_serve_twice_fails() {
        let (server, _wire) = serve(Server::builder()).await;
        assert!(server.serve().await.is_err());
    }

    #[tokio::test]
    async fn test_close_moves_to_stopped() {
        let (server, _wire) = serve(Server::builder()).await;
        server.close().await.unwrap();
        assert_eq!(server.lifecycle(), ServerLifecycle::Stopped);
    }
}
