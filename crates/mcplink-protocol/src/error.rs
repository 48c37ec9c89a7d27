//! Unified MCP error handling.
//!
//! [`McpError`] is the single error type used by the engine, session and
//! facades. Its [`ErrorKind`] keeps local failure classes (timeouts,
//! cancellation, capability violations, lost connections) distinguishable from
//! errors reported by the peer, which are carried through verbatim as
//! [`ErrorKind::Remote`].
//!
//! ```rust
//! use mcplink_protocol::error::{ErrorKind, McpError};
//!
//! let err = McpError::request_timeout("tools/call");
//! assert_eq!(err.kind, ErrorKind::RequestTimeout);
//! assert_eq!(err.jsonrpc_code(), -32001);
//! assert!(err.is_local());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::jsonrpc::JsonRpcError;

/// Result type alias for MCP operations
pub type McpResult<T> = std::result::Result<T, McpError>;

/// Unified MCP error type
///
/// The `context` field is boxed to keep `Result<T, McpError>` small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpError {
    /// Error classification
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Error data carried on the wire
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Additional context, never sent to the peer
    #[serde(skip)]
    pub context: Option<Box<ErrorContext>>,
}

/// Additional error context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation being performed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Component where error occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Request ID for tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error classification for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // === JSON-RPC Standard Errors ===
    /// Parse error (-32700)
    ParseError,
    /// Invalid request (-32600)
    InvalidRequest,
    /// Method not found (-32601)
    MethodNotFound,
    /// Invalid params (-32602)
    InvalidParams,
    /// Internal error (-32603)
    Internal,

    // === Transport / session codes ===
    /// The connection closed while the call was pending (-32000)
    ConnectionClosed,
    /// The call exceeded its deadline (-32001)
    RequestTimeout,

    // === Local failure classes ===
    /// The caller cancelled the call
    Cancelled,
    /// The peer did not negotiate the capability a method needs
    CapabilityNotSupported,
    /// The peer answered with a protocol version we do not speak
    UnsupportedProtocolVersion,
    /// A handler is already registered for the method
    HandlerAlreadyRegistered,
    /// The session has not completed the handshake
    NotInitialized,
    /// The session already completed the handshake
    AlreadyInitialized,
    /// A lifecycle transition was attempted from the wrong state
    InvalidStateTransition,
    /// Nothing to send on: not started, shutting down, or closed
    NotConnected,
    /// Transport-level failure
    Transport,
    /// Serialization failure
    Serialization,

    /// Application error reported by the peer with its own code
    Remote(i32),
}

impl McpError {
    /// Create a new error with kind and message
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
            context: None,
        }
    }

    /// Parse error
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    /// Invalid request
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Method not found
    #[must_use]
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Invalid params
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    /// Internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The connection closed before a reply arrived
    #[must_use]
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionClosed, message)
    }

    /// A request exceeded its deadline
    #[must_use]
    pub fn request_timeout(method: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RequestTimeout,
            format!("request timed out: {}", method.into()),
        )
    }

    /// The caller cancelled the request
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, reason)
    }

    /// The peer did not advertise a capability the method needs
    #[must_use]
    pub fn capability_not_supported(capability: impl Into<String>, method: &str) -> Self {
        Self::new(
            ErrorKind::CapabilityNotSupported,
            format!(
                "capability not supported: {} (required by {method})",
                capability.into()
            ),
        )
    }

    /// The peer chose a protocol version we cannot speak
    #[must_use]
    pub fn unsupported_protocol_version(version: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnsupportedProtocolVersion,
            format!("unsupported protocol version: {}", version.into()),
        )
    }

    /// A handler already claims the method
    #[must_use]
    pub fn handler_already_registered(method: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::HandlerAlreadyRegistered,
            format!("handler already registered for {}", method.into()),
        )
    }

    /// The handshake has not completed
    #[must_use]
    pub fn not_initialized() -> Self {
        Self::new(ErrorKind::NotInitialized, "Server not initialized")
    }

    /// The handshake already completed
    #[must_use]
    pub fn already_initialized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyInitialized, message)
    }

    /// Not connected
    #[must_use]
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotConnected, message)
    }

    /// Transport failure
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Serialization failure
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    /// An application error with an arbitrary code, as a handler would return it
    #[must_use]
    pub fn application(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Remote(code), message)
    }

    /// Attach wire data
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the operation context
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        let ctx = self
            .context
            .get_or_insert_with(|| Box::new(ErrorContext::default()));
        ctx.operation = Some(operation.into());
        self
    }

    /// Set the component context
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        let ctx = self
            .context
            .get_or_insert_with(|| Box::new(ErrorContext::default()));
        ctx.component = Some(component.into());
        self
    }

    /// Set the request ID context
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        let ctx = self
            .context
            .get_or_insert_with(|| Box::new(ErrorContext::default()));
        ctx.request_id = Some(request_id.into());
        self
    }

    /// True for failures that never crossed the wire
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionClosed
                | ErrorKind::RequestTimeout
                | ErrorKind::Cancelled
                | ErrorKind::CapabilityNotSupported
                | ErrorKind::UnsupportedProtocolVersion
                | ErrorKind::HandlerAlreadyRegistered
                | ErrorKind::AlreadyInitialized
                | ErrorKind::InvalidStateTransition
                | ErrorKind::NotConnected
                | ErrorKind::Transport
        )
    }

    /// Get the JSON-RPC error code for this error
    #[must_use]
    pub const fn jsonrpc_code(&self) -> i32 {
        match self.kind {
            ErrorKind::ParseError => -32700,
            ErrorKind::InvalidRequest | ErrorKind::NotInitialized => -32600,
            ErrorKind::MethodNotFound | ErrorKind::CapabilityNotSupported => -32601,
            ErrorKind::InvalidParams | ErrorKind::UnsupportedProtocolVersion => -32602,
            ErrorKind::Internal
            | ErrorKind::Cancelled
            | ErrorKind::HandlerAlreadyRegistered
            | ErrorKind::AlreadyInitialized
            | ErrorKind::InvalidStateTransition
            | ErrorKind::NotConnected
            | ErrorKind::Transport
            | ErrorKind::Serialization => -32603,
            ErrorKind::ConnectionClosed => -32000,
            ErrorKind::RequestTimeout => -32001,
            ErrorKind::Remote(code) => code,
        }
    }

    /// Convert into the wire error object, keeping message and data verbatim
    #[must_use]
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.jsonrpc_code(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }

    /// Build from a wire error object received from the peer
    #[must_use]
    pub fn from_jsonrpc_error(error: JsonRpcError) -> Self {
        Self {
            kind: ErrorKind::from_code(error.code),
            message: error.message,
            data: error.data,
            context: None,
        }
    }
}

impl ErrorKind {
    /// Classify a wire error code
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::Internal,
            -32000 => Self::ConnectionClosed,
            -32001 => Self::RequestTimeout,
            other => Self::Remote(other),
        }
    }

    /// Get a human-readable description
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid parameters",
            Self::Internal => "Internal error",
            Self::ConnectionClosed => "connection lost",
            Self::RequestTimeout => "request timed out",
            Self::Cancelled => "request cancelled",
            Self::CapabilityNotSupported => "Capability not supported",
            Self::UnsupportedProtocolVersion => "Unsupported protocol version",
            Self::HandlerAlreadyRegistered => "Handler already registered",
            Self::NotInitialized => "Not initialized",
            Self::AlreadyInitialized => "Already initialized",
            Self::InvalidStateTransition => "Invalid state transition",
            Self::NotConnected => "Not connected",
            Self::Transport => "Transport error",
            Self::Serialization => "Serialization error",
            Self::Remote(_) => "Remote error",
        }
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ctx) = &self.context {
            if let Some(op) = &ctx.operation {
                write!(f, " (operation: {})", op)?;
            }
            if let Some(comp) = &ctx.component {
                write!(f, " (component: {})", comp)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for McpError {}

impl From<JsonRpcError> for McpError {
    fn from(error: JsonRpcError) -> Self {
        Self::from_jsonrpc_error(error)
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        let kind = if err.is_syntax() || err.is_eof() {
            ErrorKind::ParseError
        } else if err.is_data() {
            ErrorKind::InvalidParams
        } else {
            ErrorKind::Serialization
        };
        Self::new(kind, format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Transport, format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_error_context() {
        let err = McpError::internal("test")
            .with_operation("test_op")
            .with_component("test_comp")
            .with_request_id("req-123");

        let ctx = err.context.clone().unwrap();
        assert_eq!(ctx.operation, Some("test_op".to_string()));
        assert_eq!(ctx.component, Some("test_comp".to_string()));
        assert_eq!(ctx.request_id, Some("req-123".to_string()));
        assert_eq!(
            err.to_string(),
            "test (operation: test_op) (component: test_comp)"
        );
    }

    #[test]
    fn test_jsonrpc_codes() {
        assert_eq!(McpError::parse_error("x").jsonrpc_code(), -32700);
        assert_eq!(McpError::invalid_request("x").jsonrpc_code(), -32600);
        assert_eq!(McpError::method_not_found("x").jsonrpc_code(), -32601);
        assert_eq!(McpError::invalid_params("x").jsonrpc_code(), -32602);
        assert_eq!(McpError::internal("x").jsonrpc_code(), -32603);
        assert_eq!(McpError::connection_closed("x").jsonrpc_code(), -32000);
        assert_eq!(McpError::request_timeout("x").jsonrpc_code(), -32001);
        assert_eq!(McpError::not_initialized().jsonrpc_code(), -32600);
    }

    #[test]
    fn test_remote_error_round_trip_is_verbatim() {
        let wire = JsonRpcError::new(-32042, "needs url").with_data(json!({"url": "https://x"}));
        let err = McpError::from(wire.clone());
        assert_eq!(err.kind, ErrorKind::Remote(-32042));
        assert!(!err.is_local());
        assert_eq!(err.to_jsonrpc_error(), wire);
    }

    #[test]
    fn test_local_classes_are_distinguishable() {
        let timeout = McpError::request_timeout("ping");
        let closed = McpError::connection_closed("connection lost");
        let gate = McpError::capability_not_supported("resources.subscribe", "resources/subscribe");
        assert!(timeout.is_local() && closed.is_local() && gate.is_local());
        assert_ne!(timeout.kind, closed.kind);
        assert_ne!(closed.kind, gate.kind);
        assert_eq!(ErrorKind::RequestTimeout.to_string(), "request timed out");
    }

    #[test]
    fn test_serde_json_error_classification() {
        let err: McpError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }
}
