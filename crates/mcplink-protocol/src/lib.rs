//! # mcplink Protocol
//!
//! The message model of the Model Context Protocol: JSON-RPC 2.0 requests,
//! notifications, responses and error messages, the unified [`McpError`] type,
//! capability structures with the method-to-capability gating table, and the
//! payloads exchanged during the initialize handshake.
//!
//! ## Message classification
//!
//! Inbound documents are classified structurally before they are deserialized:
//!
//! ```rust
//! use mcplink_protocol::jsonrpc::{classify, MessageKind};
//! use serde_json::json;
//!
//! assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})), MessageKind::Request);
//! assert_eq!(classify(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"})), MessageKind::Notification);
//! assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": 1, "result": {}})), MessageKind::Response);
//! assert_eq!(classify(&json!([])), MessageKind::Invalid);
//! ```
//!
//! ## Versions
//!
//! | Version | Status |
//! |---------|--------|
//! | `2025-06-18` | Latest, negotiated by default |
//! | `2025-03-26` | Supported |
//! | `2024-11-05` | Supported |

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod capabilities;
pub mod error;
pub mod jsonrpc;
pub mod types;
pub mod version;

pub use capabilities::{
    ClientCapabilities, ClientCapability, NegotiatedCapabilities, Requirement, Role,
    ServerCapability, CompletionCapabilities, ElicitationCapabilities, LoggingCapabilities,
    PromptsCapabilities, ResourcesCapabilities, RootsCapabilities, SamplingCapabilities,
    ServerCapabilities, ToolsCapabilities,
};
pub use error::{ErrorContext, ErrorKind, McpError, McpResult};
pub use jsonrpc::{
    JsonRpcBatch, JsonRpcError, JsonRpcErrorCode, JsonRpcErrorResponse, JsonRpcMessage,
    JsonRpcNotification, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse, JsonRpcVersion,
    MessageKind, RequestId, classify,
};
pub use types::{
    CancelledNotification, Implementation, InitializeRequest, InitializeResult, LoggingLevel,
    ProgressNotification, methods,
};
pub use version::{
    LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS, is_supported_version,
    negotiate_version,
};

/// JSON-RPC version tag carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Default per-request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Maximum message size accepted by default (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
