//! Transport error types.

use thiserror::Error;

use crate::config::LimitsConfig;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur during transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// `start` was called on a transport that is already running.
    #[error("Transport already started")]
    AlreadyStarted,

    /// The transport has not been started, or has been closed.
    #[error("Not connected")]
    NotConnected,

    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a message.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to serialize or deserialize a message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// A framing or protocol-level violation.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The peer does not know the session id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The server dropped the session; the host must re-initialize.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The peer rejected the credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The event id is unknown to the event store.
    #[error("Unknown event id: {0}")]
    UnknownEvent(String),

    /// The operation did not complete within the specified timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Outbound message size exceeds the configured maximum limit.
    #[error(
        "Request size ({size} bytes) exceeds maximum allowed ({max} bytes). \
         If this is expected, increase the limit with \
         `LimitsConfig {{ max_request_size: Some({}) }}` or use `LimitsConfig::unlimited()`.",
        size
    )]
    RequestTooLarge {
        /// The actual size of the message in bytes
        size: usize,
        /// The maximum allowed size in bytes
        max: usize,
    },

    /// Inbound message size exceeds the configured maximum limit.
    #[error(
        "Response size ({size} bytes) exceeds maximum allowed ({max} bytes). \
         If this is expected, increase the limit with \
         `LimitsConfig {{ max_response_size: Some({}) }}` or use `LimitsConfig::unlimited()`.",
        size
    )]
    ResponseTooLarge {
        /// The actual size of the message in bytes
        size: usize,
        /// The maximum allowed size in bytes
        max: usize,
    },
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<TransportError> for mcplink_protocol::McpError {
    fn from(err: TransportError) -> Self {
        use mcplink_protocol::{ErrorKind, McpError};

        let kind = match &err {
            TransportError::NotConnected => ErrorKind::NotConnected,
            _ => ErrorKind::Transport,
        };
        McpError::new(kind, err.to_string()).with_component("transport")
    }
}

/// Validates that an outbound message size does not exceed the configured limit.
///
/// `Ok(())` if the size is within limits or no limit is set.
pub fn validate_request_size(size: usize, limits: &LimitsConfig) -> TransportResult<()> {
    if let Some(max_size) = limits.max_request_size
        && size > max_size
    {
        return Err(TransportError::RequestTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

/// Validates that an inbound message size does not exceed the configured limit.
///
/// `Ok(())` if the size is within limits or no limit is set.
pub fn validate_response_size(size: usize, limits: &LimitsConfig) -> TransportResult<()> {
    if let Some(max_size) = limits.max_response_size
        && size > max_size
    {
        return Err(TransportError::ResponseTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcplink_protocol::{ErrorKind, McpError};

    #[test]
    fn test_request_size_validation() {
        let limits = LimitsConfig::default();
        tokio_test::assert_ok!(validate_request_size(1000, &limits));
        assert_eq!(
            validate_request_size(2 * 1024 * 1024, &limits),
            Err(TransportError::RequestTooLarge {
                size: 2 * 1024 * 1024,
                max: 1024 * 1024
            })
        );
    }

    #[test]
    fn test_response_size_validation() {
        let limits = LimitsConfig::default();
        tokio_test::assert_ok!(validate_response_size(1000, &limits));
        tokio_test::assert_err!(validate_response_size(50 * 1024 * 1024, &limits));
    }

    #[test]
    fn test_unlimited_config() {
        let limits = LimitsConfig::unlimited();
        tokio_test::assert_ok!(validate_request_size(100 * 1024 * 1024, &limits));
        tokio_test::assert_ok!(validate_response_size(100 * 1024 * 1024, &limits));
    }

    #[test]
    fn test_mcp_error_mapping() {
        let err: McpError = TransportError::NotConnected.into();
        assert_eq!(err.kind, ErrorKind::NotConnected);

        let err: McpError = TransportError::SendFailed("broken pipe".into()).into();
        assert_eq!(err.kind, ErrorKind::Transport);
        assert!(err.message.contains("broken pipe"));
    }
}
