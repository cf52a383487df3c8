//! Error types for the MCP runtime.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` conversions.
//! Errors fall into three taxa: transport errors (framing, I/O, disconnect),
//! protocol errors (well-formed but rejected frames, timeouts, cancellation),
//! and handler errors (user code failed; carried inside result envelopes).

use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the MCP runtime.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Handler(String),

    #[error("Internal error: {message}")]
    Internal { message: Cow<'static, str> },
}

impl McpError {
    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

/// JSON-RPC 2.0 and MCP protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("parse error: invalid JSON")]
    ParseError,

    #[error("invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(Cow<'static, str>),

    #[error("internal error: {0}")]
    InternalError(Cow<'static, str>),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request cancelled: {0}")]
    RequestCancelled(String),

    #[error("request timeout after {0:?}")]
    RequestTimeout(Duration),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown prompt: {0}")]
    UnknownPrompt(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("invalid pagination cursor")]
    InvalidCursor,

    #[error("client already initialized")]
    AlreadyInitialized,

    #[error("client not initialized")]
    NotInitialized,

    #[error("handler error: {0}")]
    Handler(String),
}

impl ProtocolError {
    /// Returns the JSON-RPC 2.0 error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) | Self::InvalidCursor => -32602,
            Self::InternalError(_) => -32603,
            Self::Rpc { code, .. } => *code,
            _ => -32000,
        }
    }
}

/// Transport-level errors: framing, I/O, lifecycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport is closed")]
    Closed,

    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while deriving schemas from handler argument types.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool argument type must be a struct with named fields, got schema type {0:?}")]
    ArgumentsNotObject(Option<String>),

    #[error("prompt argument field '{0}' must be a string or optional string")]
    PromptArgumentNotString(String),
}

/// Result type alias for McpError.
pub type Result<T> = std::result::Result<T, McpError>;

/// Result type alias for ProtocolError.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for TransportError.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
