//! Handshake and lifecycle payloads plus method name constants.
//!
//! Only the payloads the session layer itself produces or consumes are typed
//! here. Everything else travels as raw `serde_json::Value` params.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::capabilities::{ClientCapabilities, ServerCapabilities};
use crate::jsonrpc::RequestId;

/// Method names used across the protocol
pub mod methods {
    /// Handshake request
    pub const INITIALIZE: &str = "initialize";
    /// Liveness check
    pub const PING: &str = "ping";

    /// Change the server's log level
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
    /// Argument completion
    pub const COMPLETION_COMPLETE: &str = "completion/complete";
    /// List prompts
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Get a prompt
    pub const PROMPTS_GET: &str = "prompts/get";
    /// List resources
    pub const RESOURCES_LIST: &str = "resources/list";
    /// List resource templates
    pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
    /// Read a resource
    pub const RESOURCES_READ: &str = "resources/read";
    /// Subscribe to resource updates
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    /// Unsubscribe from resource updates
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
    /// List tools
    pub const TOOLS_LIST: &str = "tools/list";
    /// Call a tool
    pub const TOOLS_CALL: &str = "tools/call";

    /// Server asks the client to sample an LLM
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
    /// Server asks the client for its roots
    pub const ROOTS_LIST: &str = "roots/list";
    /// Server asks the client to elicit user input
    pub const ELICITATION_CREATE: &str = "elicitation/create";

    /// Client finished the handshake
    pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
    /// Either side abandons a request
    pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
    /// Progress on a long-running request
    pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";
    /// Server log message
    pub const NOTIFICATION_MESSAGE: &str = "notifications/message";
    /// A subscribed resource changed
    pub const NOTIFICATION_RESOURCES_UPDATED: &str = "notifications/resources/updated";
    /// Resource list changed
    pub const NOTIFICATION_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    /// Tool list changed
    pub const NOTIFICATION_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    /// Prompt list changed
    pub const NOTIFICATION_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    /// Client roots changed
    pub const NOTIFICATION_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
}

/// Name and version of an MCP implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Programmatic name
    pub name: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Implementation version
    pub version: String,
}

impl Implementation {
    /// Create an implementation descriptor without a display title
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            version: version.into(),
        }
    }

    /// Set the display title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl Default for Implementation {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

/// Params of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Protocol version the client wants to speak
    pub protocol_version: String,
    /// What the client offers
    pub capabilities: ClientCapabilities,
    /// Who the client is
    pub client_info: Implementation,
    /// Reserved metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Result of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Version the server chose
    pub protocol_version: String,
    /// What the server offers
    pub capabilities: ServerCapabilities,
    /// Who the server is
    pub server_info: Implementation,
    /// Usage hints for the client's model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Reserved metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Params of `notifications/cancelled`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotification {
    /// Id of the request being cancelled
    pub request_id: RequestId,
    /// Free-form reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Params of `notifications/progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    /// Token from the originating request's `_meta.progressToken`
    pub progress_token: RequestId,
    /// Progress so far; increases monotonically
    pub progress: f64,
    /// Total, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Human-readable status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Severity of a `notifications/message` entry, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// Debug
    Debug,
    /// Info
    Info,
    /// Notice
    Notice,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Critical
    Critical,
    /// Alert
    Alert,
    /// Emergency
    Emergency,
}

impl LoggingLevel {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoggingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "notice" => Ok(Self::Notice),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            "alert" => Ok(Self::Alert),
            "emergency" => Ok(Self::Emergency),
            other => Err(format!("unknown logging level: {other}")),
        }
    }
}

/// Params of `logging/setLevel`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLevelRequest {
    /// Minimum level the client wants to receive
    pub level: LoggingLevel,
}

/// Params of `notifications/message`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessageNotification {
    /// Severity
    pub level: LoggingLevel,
    /// Logger name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary JSON payload
    pub data: Value,
}

/// Params of `notifications/resources/updated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdatedNotification {
    /// URI of the resource that changed
    pub uri: String,
}

/// Read `_meta.progressToken` from request params
pub fn progress_token(params: Option<&Value>) -> Option<RequestId> {
    params
        .and_then(|p| p.get("_meta"))
        .and_then(|m| m.get("progressToken"))
        .and_then(|t| serde_json::from_value(t.clone()).ok())
}

/// Return params with `_meta.progressToken` set, creating `params` and `_meta`
/// when absent. Non-object params are returned untouched.
pub fn with_progress_token(params: Option<Value>, token: &RequestId) -> Option<Value> {
    let mut params = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let Some(obj) = params.as_object_mut() else {
        return Some(params);
    };
    let meta = obj
        .entry("_meta")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert(
            "progressToken".to_string(),
            serde_json::to_value(token).unwrap_or(Value::Null),
        );
    }
    Some(params)
}
