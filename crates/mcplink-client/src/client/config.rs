//! Client configuration types

use std::time::Duration;

use mcplink_protocol::{DEFAULT_REQUEST_TIMEOUT_MS, LATEST_PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};

/// Connection configuration for the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default timeout for requests that do not set their own, in milliseconds
    pub request_timeout_ms: u64,

    /// Timeout for the `initialize` request, in milliseconds
    pub init_timeout_ms: u64,

    /// Ceiling for requests whose timeout is reset by progress, in milliseconds
    pub max_total_timeout_ms: Option<u64>,

    /// Protocol version requested during `initialize`
    pub protocol_version: String,

    /// Reject unknown methods instead of passing them through
    pub strict_capabilities: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            init_timeout_ms: 30_000, // 30 seconds
            max_total_timeout_ms: None,
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            strict_capabilities: false,
        }
    }
}

impl ClientConfig {
    /// Default request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Handshake timeout
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Progress-reset ceiling
    pub fn max_total_timeout(&self) -> Option<Duration> {
        self.max_total_timeout_ms.map(Duration::from_millis)
    }
}
