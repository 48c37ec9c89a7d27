//! # mcplink STDIO Transport
//!
//! Standard I/O transport for the mcplink Model Context Protocol implementation.
//! This is the standard way local MCP servers talk to their host.
//!
//! ## Framing
//!
//! - **Newline-delimited JSON**: `LinesCodec` frames one UTF-8 JSON document per line
//! - **No embedded newlines**: outbound messages containing `\n` or `\r` are rejected
//! - **Tolerant reader**: blank lines are skipped and a malformed line is reported
//!   through `on_error` without stopping the reader
//! - **stderr for logging**: stdout carries protocol traffic only
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mcplink_stdio::StdioTransport;
//! use mcplink_transport_traits::Transport;
//!
//! # async fn run() -> Result<(), mcplink_transport_traits::TransportError> {
//! let mut command = tokio::process::Command::new("my-mcp-server");
//! command.arg("--stdio");
//! let transport = StdioTransport::from_command(command);
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

mod transport;

pub use transport::StdioTransport;

// Re-export common types for convenience
pub use mcplink_transport_traits::{
    LimitsConfig, Transport, TransportCapabilities, TransportError, TransportResult,
    TransportState, TransportType,
};
