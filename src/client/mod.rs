//! MCP client: issues the same requests the server dispatches, outbound.

use crate::content::{CallToolResult, GetPromptResult, PromptResponse, ReadResourceResult,
    ResourceResponse};
use crate::error::{McpError, ProtocolError, Result};
use crate::protocol::{
    Implementation, InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    Protocol, RequestOptions, ServerCapabilities, MCP_VERSION,
};
use crate::transport::Transport;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// An MCP client connected to a single server over a pluggable transport.
///
/// [`Client::initialize`] must be called once before any other request;
/// calling it a second time fails.
pub struct Client {
    protocol: Protocol,
    transport: Arc<dyn Transport>,
    info: Implementation,
    initialized: AtomicBool,
    capabilities: RwLock<Option<ServerCapabilities>>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_info(
            transport,
            Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        )
    }

    pub fn with_info(transport: Arc<dyn Transport>, info: Implementation) -> Self {
        Self {
            protocol: Protocol::new(),
            transport,
            info,
            initialized: AtomicBool::new(false),
            capabilities: RwLock::new(None),
        }
    }

    /// The protocol core this client issues requests through.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Connects the transport and performs the `initialize` handshake,
    /// retrieving the server's capabilities.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::AlreadyInitialized.into());
        }

        self.protocol.connect(Arc::clone(&self.transport)).await?;

        let params = json!({
            "protocolVersion": MCP_VERSION,
            "capabilities": {},
            "clientInfo": &self.info,
        });
        let result: InitializeResult = self
            .request("initialize", Some(params))
            .await?;

        info!(
            "initialized against {} v{}",
            result.server_info.name, result.server_info.version
        );
        *self.capabilities.write() = Some(result.capabilities.clone());
        Ok(result)
    }

    /// The server capabilities obtained during initialization.
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().clone()
    }

    /// Retrieves one page of the server's tools.
    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        self.ensure_initialized()?;
        self.request("tools/list", Some(json!({ "cursor": cursor })))
            .await
    }

    /// Invokes a tool by name.
    pub async fn call_tool<A: Serialize>(
        &self,
        name: &str,
        arguments: &A,
    ) -> Result<CallToolResult> {
        self.ensure_initialized()?;
        let params = json!({ "name": name, "arguments": arguments });
        self.request("tools/call", Some(params)).await
    }

    /// Retrieves one page of the server's prompts.
    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        self.ensure_initialized()?;
        self.request("prompts/list", Some(json!({ "cursor": cursor })))
            .await
    }

    /// Renders a prompt by name. Handler-side failures surface as
    /// [`McpError::Handler`].
    pub async fn get_prompt<A: Serialize>(
        &self,
        name: &str,
        arguments: &A,
    ) -> Result<PromptResponse> {
        self.ensure_initialized()?;
        let params = json!({ "name": name, "arguments": arguments });
        let result: GetPromptResult = self.request("prompts/get", Some(params)).await?;
        if let Some(error) = result.error {
            return Err(McpError::Handler(error));
        }
        Ok(PromptResponse {
            description: result.description,
            messages: result.messages,
        })
    }

    /// Retrieves one page of the server's resources.
    pub async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        self.ensure_initialized()?;
        self.request("resources/list", Some(json!({ "cursor": cursor })))
            .await
    }

    /// Reads a resource by URI. Handler-side failures surface as
    /// [`McpError::Handler`].
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceResponse> {
        self.ensure_initialized()?;
        let result: ReadResourceResult = self
            .request("resources/read", Some(json!({ "uri": uri })))
            .await?;
        if let Some(error) = result.error {
            return Err(McpError::Handler(error));
        }
        Ok(ResourceResponse {
            contents: result.contents,
        })
    }

    /// Checks connectivity.
    pub async fn ping(&self) -> Result<()> {
        self.ensure_initialized()?;
        let _: Value = self.request("ping", None).await?;
        Ok(())
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<()> {
        self.protocol.close().await
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProtocolError::NotInitialized.into())
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let result = self
            .protocol
            .request(method, params, RequestOptions::default())
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}
