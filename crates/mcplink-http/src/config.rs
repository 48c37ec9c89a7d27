//! Client and server configuration for the streamable HTTP transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mcplink_protocol::LATEST_PROTOCOL_VERSION;
use mcplink_transport_traits::{EventStore, LimitsConfig, TimeoutConfig};
use serde::{Deserialize, Serialize};

use crate::auth::TokenVerifier;

/// Reconnection policy for the standalone SSE stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RetryPolicy {
    /// Fixed interval between retries
    Fixed {
        /// Time interval between retry attempts
        interval: Duration,
        /// Maximum number of retry attempts (None for unlimited)
        max_attempts: Option<u32>,
    },
    /// Exponential backoff
    Exponential {
        /// Base delay for exponential backoff calculation
        base: Duration,
        /// Maximum delay between retry attempts
        max_delay: Duration,
        /// Maximum number of retry attempts (None for unlimited)
        max_attempts: Option<u32>,
    },
    /// Never retry
    Never,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` once the
    /// policy gives up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Fixed {
                interval,
                max_attempts,
            } => {
                if let Some(max) = max_attempts
                    && attempt >= *max
                {
                    return None;
                }
                Some(*interval)
            }
            Self::Exponential {
                base,
                max_delay,
                max_attempts,
            } => {
                if let Some(max) = max_attempts
                    && attempt >= *max
                {
                    return None;
                }
                let base_ms = base.as_millis() as u64;
                let capped = base_ms
                    .saturating_mul(2u64.saturating_pow(attempt))
                    .min(max_delay.as_millis() as u64);
                // ±25% jitter derived from the attempt number
                let jitter_range = capped / 4;
                let jitter = if jitter_range > 0 {
                    (u64::from(attempt))
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407)
                        % (jitter_range * 2)
                } else {
                    0
                };
                Some(Duration::from_millis(
                    capped.saturating_sub(jitter_range).saturating_add(jitter),
                ))
            }
            Self::Never => None,
        }
    }
}

/// Configuration for [`StreamableHttpClientTransport`](crate::StreamableHttpClientTransport).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamableHttpClientConfig {
    /// Server origin, e.g. `http://localhost:8080`
    pub base_url: String,

    /// MCP endpoint path
    pub endpoint_path: String,

    /// Connect and per-request timeouts
    pub timeouts: TimeoutConfig,

    /// Reconnection policy for the GET stream
    pub retry_policy: RetryPolicy,

    /// Bearer token sent as `Authorization`
    pub auth_token: Option<String>,

    /// Extra headers added to every request
    pub headers: HashMap<String, String>,

    /// `User-Agent` header; `None` omits it
    pub user_agent: Option<String>,

    /// Value of the `MCP-Protocol-Version` header
    pub protocol_version: String,

    /// Size limits for requests and responses
    pub limits: LimitsConfig,
}

impl Default for StreamableHttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            endpoint_path: "/mcp".to_string(),
            timeouts: TimeoutConfig {
                connect: Duration::from_secs(5),
                request: Some(Duration::from_secs(30)),
                total: None,
            },
            retry_policy: RetryPolicy::default(),
            auth_token: None,
            headers: HashMap::new(),
            user_agent: Some(format!("mcplink/{}", env!("CARGO_PKG_VERSION"))),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            limits: LimitsConfig::default(),
        }
    }
}

impl StreamableHttpClientConfig {
    /// Config pointing at `base_url` with defaults elsewhere
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Full endpoint URL
    pub fn endpoint_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.endpoint_path.starts_with('/') {
            format!("{base}{}", self.endpoint_path)
        } else {
            format!("{base}/{}", self.endpoint_path)
        }
    }
}

/// Configuration for [`StreamableHttpServerTransport`](crate::StreamableHttpServerTransport).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamableHttpServerConfig {
    /// Bind address (default: 127.0.0.1:8080)
    pub bind_addr: String,

    /// MCP endpoint path
    pub endpoint_path: String,

    /// SSE keep-alive interval
    pub keep_alive: Duration,

    /// Answer requests with one JSON body instead of an SSE stream
    pub enable_json_response: bool,

    /// Whether `DELETE` may terminate the session
    pub allow_delete: bool,

    /// Size limits for inbound bodies and outbound messages
    pub limits: LimitsConfig,

    /// Storage for resumable streams
    #[serde(skip)]
    pub event_store: Option<Arc<dyn EventStore>>,

    /// Bearer token verification
    #[serde(skip)]
    pub token_verifier: Option<Arc<dyn TokenVerifier>>,
}

impl fmt::Debug for StreamableHttpServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("endpoint_path", &self.endpoint_path)
            .field("keep_alive", &self.keep_alive)
            .field("enable_json_response", &self.enable_json_response)
            .field("allow_delete", &self.allow_delete)
            .field("limits", &self.limits)
            .field("event_store", &self.event_store.is_some())
            .field("token_verifier", &self.token_verifier.is_some())
            .finish()
    }
}

impl Default for StreamableHttpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            endpoint_path: "/mcp".to_string(),
            keep_alive: Duration::from_secs(15),
            enable_json_response: false,
            allow_delete: true,
            limits: LimitsConfig::default(),
            event_store: None,
            token_verifier: None,
        }
    }
}

impl StreamableHttpServerConfig {
    /// Set the bind address
    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Enable resumability with the given store
    #[must_use]
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Require bearer tokens accepted by `verifier`
    #[must_use]
    pub fn with_token_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.token_verifier = Some(verifier);
        self
    }

    /// Answer with JSON bodies instead of SSE streams
    #[must_use]
    pub fn with_json_response(mut self, enabled: bool) -> Self {
        self.enable_json_response = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exponential_backoff_is_capped_and_bounded() {
        let policy = RetryPolicy::Exponential {
            base: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            max_attempts: Some(5),
        };
        for attempt in 0..5 {
            let delay = policy.delay(attempt).unwrap().as_millis() as u64;
            let nominal = (100u64 << attempt).min(1_000);
            assert!(delay >= nominal - nominal / 4, "attempt {attempt}: {delay}");
            assert!(delay <= nominal + nominal / 4, "attempt {attempt}: {delay}");
        }
        assert_eq!(policy.delay(5), None);
    }

    #[test]
    fn test_fixed_and_never() {
        let fixed = RetryPolicy::Fixed {
            interval: Duration::from_millis(10),
            max_attempts: None,
        };
        assert_eq!(fixed.delay(1_000), Some(Duration::from_millis(10)));
        assert_eq!(RetryPolicy::Never.delay(0), None);
    }

    #[test]
    fn test_client_defaults() {
        let config = StreamableHttpClientConfig::default();
        assert_eq!(config.endpoint_url(), "http://localhost:8080/mcp");
        assert_eq!(config.timeouts.connect, Duration::from_secs(5));
        assert_eq!(config.timeouts.request, Some(Duration::from_secs(30)));
        assert_eq!(config.protocol_version, "2025-06-18");

        let trailing = StreamableHttpClientConfig::new("http://127.0.0.1:9/");
        assert_eq!(trailing.endpoint_url(), "http://127.0.0.1:9/mcp");
    }

    #[test]
    fn test_server_defaults_and_deserialization() {
        let config = StreamableHttpServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.keep_alive, Duration::from_secs(15));
        assert!(config.allow_delete);

        let parsed: StreamableHttpServerConfig =
            serde_json::from_value(serde_json::json!({"endpoint_path": "/rpc"})).unwrap();
        assert_eq!(parsed.endpoint_path, "/rpc");
        assert!(parsed.event_store.is_none());
    }
}
