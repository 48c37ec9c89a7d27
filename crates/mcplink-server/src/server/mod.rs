//! MCP server implementation
//!
//! - `builder`: [`ServerBuilder`] for identity, capabilities and handlers
//! - `core`: [`Server`] and the `initialize` lifecycle
//! - `session`: [`ServerSession`], one connected client

pub mod builder;
pub mod core;
pub mod session;

pub use builder::{InitializedHook, ServerBuilder};
pub use core::Server;
pub use session::ServerSession;
