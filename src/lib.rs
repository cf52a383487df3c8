//! MCP server/client runtime.
//!
//! A bidirectional JSON-RPC 2.0 framing layer with request/response
//! correlation, progress and cancellation, plus a capability dispatcher that
//! exposes typed tool, prompt and resource handlers as RPC methods with
//! schemas derived from their argument types.
//!
//! # Example
//!
//! ```no_run
//! use mcp_runtime::content::ToolResponse;
//! use mcp_runtime::server::Server;
//! use mcp_runtime::transport::StdioTransport;
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct HelloArguments {
//!     /// The name of the thing calling this tool.
//!     submitter: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> mcp_runtime::Result<()> {
//!     let server = Server::builder()
//!         .name("hello-server")
//!         .build(Arc::new(StdioTransport::stdio()));
//!
//!     server
//!         .register_tool("hello", "Say hello to a person", |args: HelloArguments| async move {
//!             Ok(ToolResponse::text(format!("Hello, {}!", args.submitter)))
//!         })
//!         .await?;
//!
//!     server.serve().await?;
//!     // Serving runs on background tasks; park this one.
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod content;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod transport;

pub use client::Client;
pub use content::{
    Annotations, CallToolResult, Content, PromptMessage, PromptResponse, ResourceContents,
    ResourceResponse, Role, ToolResponse,
};
pub use error::{McpError, ProtocolError, Result, SchemaError, TransportError};
pub use protocol::{Protocol, RequestOptions};
pub use server::{Server, ServerBuilder, ServerLifecycle};
pub use transport::{ChannelTransport, SseServerTransport, StdioTransport, Transport};
