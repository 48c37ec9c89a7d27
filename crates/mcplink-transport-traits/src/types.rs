//! Core transport types.

use std::collections::HashMap;
use std::fmt;

use mcplink_protocol::RequestId;
use serde::{Deserialize, Serialize};

/// Enumerates the transports mcplink ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// Newline-delimited JSON over stdin/stdout or raw streams.
    Stdio,
    /// Stdio to a spawned child process.
    ChildProcess,
    /// Streamable HTTP (POST + SSE).
    StreamableHttp,
    /// Linked in-process pair.
    InMemory,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::ChildProcess => write!(f, "child_process"),
            Self::StreamableHttp => write!(f, "streamable_http"),
            Self::InMemory => write!(f, "in_memory"),
        }
    }
}

/// Represents the current state of a transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// The transport is not connected.
    Disconnected,
    /// The transport is in the process of connecting.
    Connecting,
    /// The transport is connected and ready to send/receive messages.
    Connected,
    /// The transport is in the process of disconnecting.
    Disconnecting,
    /// The transport has encountered an unrecoverable error.
    Failed {
        /// A description of the failure reason.
        reason: String,
    },
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Describes the capabilities of a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCapabilities {
    /// The maximum message size in bytes that the transport can handle.
    pub max_message_size: Option<usize>,

    /// Whether the transport streams several replies for one write (SSE).
    pub supports_streaming: bool,

    /// Whether the transport can replay missed events after reconnecting.
    pub supports_resumability: bool,

    /// Whether the transport carries an `Mcp-Session-Id`.
    pub supports_session_id: bool,

    /// Whether the server can push messages without a prior request.
    pub supports_bidirectional: bool,

    /// A map for any other custom capabilities.
    pub custom: HashMap<String, serde_json::Value>,
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self {
            max_message_size: Some(mcplink_protocol::MAX_MESSAGE_SIZE),
            supports_streaming: false,
            supports_resumability: false,
            supports_session_id: false,
            supports_bidirectional: true,
            custom: HashMap::new(),
        }
    }
}

/// Per-send routing hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// The inbound request this message belongs to. Streamable HTTP uses it
    /// to pick the SSE stream opened by that request's POST.
    pub related_request_id: Option<RequestId>,
}

impl SendOptions {
    /// Options bound to an inbound request
    pub fn related_to(id: RequestId) -> Self {
        Self {
            related_request_id: Some(id),
        }
    }
}

/// Verified credentials attached to an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// The raw bearer token
    pub token: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Expiry as seconds since the epoch
    pub expires_at: Option<u64>,
    /// Anything else the verifier wants to pass along
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}
