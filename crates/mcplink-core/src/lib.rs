//! # mcplink Core
//!
//! The protocol session layer shared by the client and server facades:
//!
//! - [`ProtocolEngine`]: id allocation, pending-call correlation, timeouts,
//!   cancellation, progress routing and inbound dispatch
//! - [`Session`]: the lifecycle state machine and the capability gate
//! - [`RequestHandler`] / [`NotificationHandler`]: what the engine calls for
//!   inbound traffic, implemented for async closures
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcplink_core::{ProtocolEngine, RequestContext, RequestOptions, Session};
//! use mcplink_protocol::{McpResult, Role};
//! use mcplink_transport_traits::InMemoryTransport;
//! use serde_json::{Value, json};
//!
//! # async fn demo() -> McpResult<()> {
//! let (a, b) = InMemoryTransport::pair();
//! let server = ProtocolEngine::new(Arc::new(b), Arc::new(Session::new(Role::Server)));
//! server.set_request_handler("echo", |params: Option<Value>, _ctx: RequestContext| async move {
//!     Ok(params.unwrap_or(Value::Null))
//! })?;
//! server.start().await?;
//!
//! let client = ProtocolEngine::new(Arc::new(a), Arc::new(Session::new(Role::Client)));
//! client.start().await?;
//! let pong = client.send_request("ping", None, RequestOptions::default()).await?;
//! assert_eq!(pong, json!({}));
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

mod context;
mod engine;
mod handler;
mod options;
pub mod session;

pub use context::RequestContext;
pub use engine::{EngineConfig, ProtocolEngine};
pub use handler::{NotificationHandler, RequestHandler};
pub use options::{ProgressCallback, RequestOptions};
pub use session::{Negotiated, Session, SessionState};

/// Re-exported so handlers can name the token type without a direct dependency
pub use tokio_util::sync::CancellationToken;
