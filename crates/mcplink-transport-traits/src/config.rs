//! Transport configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for request and response size limits.
///
/// "Request" is what this side writes, "response" is what it reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    /// `None` = unlimited
    pub max_response_size: Option<usize>,

    /// Maximum outbound message size in bytes.
    /// `None` = unlimited
    pub max_request_size: Option<usize>,

    /// Whether to enforce limits on individual SSE events.
    pub enforce_on_streams: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_response_size: Some(10 * 1024 * 1024), // 10MB
            max_request_size: Some(1024 * 1024),       // 1MB
            enforce_on_streams: true,
        }
    }
}

impl LimitsConfig {
    /// Create a configuration with no limits.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_response_size: None,
            max_request_size: None,
            enforce_on_streams: false,
        }
    }

    /// Create a configuration with strict limits for untrusted peers.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            max_response_size: Some(1024 * 1024), // 1MB
            max_request_size: Some(256 * 1024),   // 256KB
            enforce_on_streams: true,
        }
    }
}

/// Configuration for connection and request timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout.
    pub connect: Duration,

    /// Single request timeout.
    /// `None` = no timeout
    pub request: Option<Duration>,

    /// Ceiling for a request whose timeout is reset by progress.
    /// `None` = no ceiling
    pub total: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Some(Duration::from_millis(mcplink_protocol::DEFAULT_REQUEST_TIMEOUT_MS)),
            total: None,
        }
    }
}

impl TimeoutConfig {
    /// Short timeouts for local peers.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            connect: Duration::from_secs(2),
            request: Some(Duration::from_secs(10)),
            total: Some(Duration::from_secs(15)),
        }
    }

    /// No request timeouts at all.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            connect: Duration::from_secs(30),
            request: None,
            total: None,
        }
    }

    /// Long timeouts for slow tools.
    #[must_use]
    pub const fn patient() -> Self {
        Self {
            connect: Duration::from_secs(30),
            request: Some(Duration::from_secs(300)), // 5 minutes
            total: Some(Duration::from_secs(600)),   // 10 minutes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_config_default() {
        let config = LimitsConfig::default();
        assert_eq!(config.max_response_size, Some(10 * 1024 * 1024));
        assert_eq!(config.max_request_size, Some(1024 * 1024));
    }

    #[test]
    fn test_timeout_config_default() {
        let config = TimeoutConfig::default();
        assert_eq!(config.connect, Duration::from_secs(5));
        assert_eq!(config.request, Some(Duration::from_secs(60)));
        assert_eq!(config.total, None);
    }

    #[test]
    fn test_partial_limits_deserialize() {
        let config: LimitsConfig =
            serde_json::from_str(r#"{"max_request_size": 2048}"#).unwrap();
        assert_eq!(config.max_request_size, Some(2048));
        assert_eq!(config.max_response_size, Some(10 * 1024 * 1024));
    }
}
