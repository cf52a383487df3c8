//! MCP protocol implementation over JSON-RPC 2.0.

pub mod core;
pub mod types;

pub use core::{
    CloseCallback, ErrorCallback, NotificationHandler, ProgressCallback, Protocol, RequestHandler,
    RequestHandlerExtra, RequestOptions, DEFAULT_REQUEST_TIMEOUT,
};
pub use types::*;
