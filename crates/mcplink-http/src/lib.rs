//! # mcplink HTTP Transport
//!
//! Streamable HTTP transport for the Model Context Protocol: a single endpoint
//! accepting `POST` (client messages), `GET` (server-initiated SSE stream) and
//! `DELETE` (session termination).
//!
//! - [`StreamableHttpClientTransport`] speaks to a remote endpoint with `reqwest`.
//! - [`StreamableHttpServerTransport`] serves one session with `axum`.
//!
//! ## Client
//!
//! ```rust,no_run
//! use mcplink_http::{StreamableHttpClientConfig, StreamableHttpClientTransport};
//! use mcplink_transport_traits::Transport;
//!
//! # async fn demo() -> Result<(), mcplink_transport_traits::TransportError> {
//! let config = StreamableHttpClientConfig {
//!     auth_token: Some("token".to_string()),
//!     ..StreamableHttpClientConfig::new("http://localhost:8080")
//! };
//! let transport = StreamableHttpClientTransport::new(config)?;
//! transport.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Server
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcplink_http::{StreamableHttpServerConfig, StreamableHttpServerTransport};
//! use mcplink_transport_traits::{InMemoryEventStore, Transport};
//!
//! # async fn demo() -> Result<(), mcplink_transport_traits::TransportError> {
//! let config = StreamableHttpServerConfig::default()
//!     .with_bind_addr("127.0.0.1:3000")
//!     .with_event_store(Arc::new(InMemoryEventStore::new()));
//! let transport = StreamableHttpServerTransport::new(config);
//! transport.start().await?;
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

mod auth;
mod client;
mod config;
mod server;
pub mod sse;

pub use auth::{StaticTokenVerifier, TokenVerifier};
pub use client::StreamableHttpClientTransport;
pub use config::{RetryPolicy, StreamableHttpClientConfig, StreamableHttpServerConfig};
pub use server::StreamableHttpServerTransport;
pub use sse::{SseEvent, SseParser};

/// Header carrying the session id
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Header carrying the negotiated protocol version
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Header carrying the resume point of an SSE stream
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";
