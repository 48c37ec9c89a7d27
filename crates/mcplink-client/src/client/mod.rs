//! MCP client implementation
//!
//! - `builder`: [`ClientBuilder`] for construction
//! - `config`: serde-loadable [`ClientConfig`]
//! - `core`: [`Client`], the handshake and reconnection
//! - `operations`: the typed MCP methods

pub mod builder;
pub mod config;
pub mod core;
mod operations;

pub use builder::{ClientBuilder, InitializedHook, TransportFactory};
pub use config::ClientConfig;
pub use core::Client;
