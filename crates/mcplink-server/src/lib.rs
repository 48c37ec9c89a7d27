//! # mcplink Server
//!
//! MCP (Model Context Protocol) server: answers `initialize`, holds every
//! other request back until the client's `notifications/initialized`, and
//! sends server-initiated requests through the capability gate.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mcplink_core::RequestContext;
//! use mcplink_protocol::{Implementation, McpResult, ServerCapabilities};
//! use mcplink_server::{LoggingConfig, Server};
//! use mcplink_transport_traits::InMemoryTransport;
//! use serde_json::{Value, json};
//!
//! # async fn example() -> McpResult<()> {
//! LoggingConfig::stderr_minimal().init().ok();
//!
//! let server = Server::builder()
//!     .server_info(Implementation::new("echo", "1.0.0"))
//!     .capabilities(ServerCapabilities::default().enable_tools(false))
//!     .request_handler("tools/call", |params: Option<Value>, _ctx: RequestContext| async move {
//!         McpResult::Ok(json!({"content": [{"type": "text", "text": params.unwrap_or_default().to_string()}]}))
//!     })
//!     .build();
//!
//! let (_client_side, server_side) = InMemoryTransport::pair();
//! let session = server.serve(server_side).await?;
//! session.wait_closed().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod config;
pub mod logging;
pub mod server;

pub use config::{ConfigError, LogFormat, LoggingConfig, ServerConfig};
pub use mcplink_core::{RequestContext, RequestOptions, SessionState};
pub use server::{InitializedHook, Server, ServerBuilder, ServerSession};

/// Default server name
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

/// Default server version
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
