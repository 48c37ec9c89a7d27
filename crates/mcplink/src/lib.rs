//! # mcplink - Model Context Protocol core for Rust
//!
//! The pieces an MCP client or server is built from, in one crate:
//!
//! - **Message model** ([`protocol`]): JSON-RPC 2.0 requests, notifications,
//!   replies and batches, MCP errors and capabilities
//! - **Transports** ([`transport`], [`stdio`], [`http`]): one contract over
//!   in-memory pairs, newline-delimited stdio and Streamable HTTP
//! - **Protocol engine** ([`engine`]): request correlation, timeouts,
//!   cancellation, progress and dispatch
//! - **Session lifecycle**: the initialize handshake and the capability gate
//! - **Facades**: [`Client`] and [`Server`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcplink::prelude::*;
//!
//! # async fn demo() -> McpResult<()> {
//! let server = Server::builder()
//!     .server_info(Implementation::new("greeter", "1.0.0"))
//!     .capabilities(ServerCapabilities::default().enable_tools(false))
//!     .request_handler("tools/call", |params: Option<Value>, _ctx: RequestContext| async move {
//!         let name = params.unwrap_or_default()["arguments"]["name"].clone();
//!         McpResult::Ok(json!({"content": [{"type": "text", "text": format!("Hello, {name}")}]}))
//!     })
//!     .build();
//!
//! let (client_side, server_side) = InMemoryTransport::pair();
//! let _session = server.serve(server_side).await?;
//!
//! let client = Client::builder().connect(client_side).await?;
//! let greeting = client.call_tool("greet", Some(json!({"name": "Ada"}))).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `stdio` (default): [`StdioTransport`](stdio::StdioTransport)
//! - `http`: Streamable HTTP client and server transports
//! - `full`: both

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub use mcplink_client as client;
pub use mcplink_core as engine;
pub use mcplink_protocol as protocol;
pub use mcplink_server as server;
pub use mcplink_transport_traits as transport;

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use mcplink_http as http;
#[cfg(feature = "stdio")]
#[cfg_attr(docsrs, doc(cfg(feature = "stdio")))]
pub use mcplink_stdio as stdio;

pub use mcplink_client::{Client, ClientBuilder, ClientConfig};
pub use mcplink_core::{ProtocolEngine, RequestContext, RequestOptions, Session, SessionState};
pub use mcplink_protocol::{ErrorKind, McpError, McpResult};
pub use mcplink_server::{Server, ServerBuilder, ServerConfig, ServerSession};

pub use serde_json;
pub use tracing;

/// Everything a typical client or server needs
pub mod prelude {
    pub use mcplink_client::{Client, ClientBuilder, ClientConfig};
    pub use mcplink_core::{
        CancellationToken, Negotiated, RequestContext, RequestOptions, SessionState,
    };
    pub use mcplink_protocol::{
        ClientCapabilities, ErrorKind, Implementation, LoggingLevel, McpError, McpResult,
        ServerCapabilities, methods,
    };
    pub use mcplink_server::{LoggingConfig, Server, ServerBuilder, ServerConfig, ServerSession};
    pub use mcplink_transport_traits::{InMemoryTransport, Transport};

    #[cfg(feature = "http")]
    pub use mcplink_http::{
        StreamableHttpClientConfig, StreamableHttpClientTransport, StreamableHttpServerConfig,
        StreamableHttpServerTransport,
    };
    #[cfg(feature = "stdio")]
    pub use mcplink_stdio::StdioTransport;

    pub use serde_json::{Value, json};
}
