//! # mcplink Client
//!
//! MCP (Model Context Protocol) client: connects to a server over any
//! [`Transport`](mcplink_transport_traits::Transport), runs the initialize
//! handshake and exposes the MCP methods with the capability gate applied.
//!
//! ## Architecture
//!
//! ```text
//! Application Layer
//!        ↓
//! Client API (this crate)
//!        ↓
//! Protocol Engine + Session (mcplink-core)
//!        ↓
//! Transport Layer (mcplink-stdio, mcplink-http, in-memory)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mcplink_client::Client;
//! use mcplink_protocol::{Implementation, McpResult};
//! use mcplink_transport_traits::InMemoryTransport;
//! use serde_json::json;
//!
//! # async fn example() -> McpResult<()> {
//! let (transport, _server_side) = InMemoryTransport::pair();
//! let client = Client::builder()
//!     .client_info(Implementation::new("my-host", "1.0.0"))
//!     .connect(transport)
//!     .await?;
//!
//! println!("connected to {:?}", client.server_info());
//! let _result = client.call_tool("add", Some(json!({"a": 1, "b": 2}))).await?;
//! client.shutdown().await?;
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

pub mod client;

pub use client::{Client, ClientBuilder, ClientConfig, InitializedHook, TransportFactory};
pub use mcplink_core::{RequestContext, RequestOptions, SessionState};
