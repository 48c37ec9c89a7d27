//! # JSON-RPC 2.0 message model
//!
//! Typed representations of the four MCP message shapes, the structural
//! classifier used on inbound documents, and non-empty batches.
//!
//! Classification is evaluated in a fixed order (request, notification,
//! response, error message) and every document lands in exactly one
//! [`MessageKind`]. Typed deserialization of [`JsonRpcMessage`] goes through
//! [`classify`] first, so the untagged wire format never picks the wrong shape.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::JSONRPC_VERSION;
use crate::error::{McpError, McpResult};

/// Correlation id of a request: a JSON string or a JSON integer.
///
/// The id is echoed verbatim in the matching reply, so the variant is never
/// re-typed: a numeric id stays numeric on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id
    Number(i64),
    /// String id
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

/// JSON-RPC version tag; serializes as `"2.0"` and rejects anything else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "Invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// A request; expects exactly one terminal reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Request identifier
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new request
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A notification; fire-and-forget, never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// A success reply. `result` is always emitted, even when it is `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Id of the request being answered
    pub id: RequestId,
    /// Result payload
    pub result: Value,
}

impl JsonRpcResponse {
    /// Create a success reply
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            result,
        }
    }
}

/// A failure reply.
///
/// The id is `null` on the wire only when no id could be recovered from the
/// offending input (parse errors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Id of the request being answered
    pub id: Option<RequestId>,
    /// Error object
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    /// Create a failure reply for a known request id
    pub fn new(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: Some(id.into()),
            error,
        }
    }

    /// Create a failure reply with a `null` id
    pub fn without_id(error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: None,
            error,
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create a new error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach error data
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Parse error (-32700)
    pub fn parse_error(details: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::ParseError.code(), details)
    }

    /// Invalid request (-32600)
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest.code(), reason)
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound.code(),
            format!("Method not found: {method}"),
        )
    }

    /// Invalid params (-32602)
    pub fn invalid_params(details: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidParams.code(), details)
    }

    /// Internal error (-32603)
    pub fn internal_error(details: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InternalError.code(), details)
    }

    /// Get the error code
    pub fn code(&self) -> i32 {
        self.code
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Standard JSON-RPC error codes plus the transport/session codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    /// Parse error (-32700)
    ParseError,
    /// Invalid request (-32600)
    InvalidRequest,
    /// Method not found (-32601)
    MethodNotFound,
    /// Invalid params (-32602)
    InvalidParams,
    /// Internal error (-32603)
    InternalError,
    /// Connection closed (-32000)
    ConnectionClosed,
    /// Request timed out (-32001)
    RequestTimeout,
    /// Application-defined error
    ApplicationError(i32),
}

impl JsonRpcErrorCode {
    /// Get the numeric error code
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ConnectionClosed => -32000,
            Self::RequestTimeout => -32001,
            Self::ApplicationError(code) => *code,
        }
    }

    /// Get the standard error message
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ConnectionClosed => "Connection closed",
            Self::RequestTimeout => "Request timed out",
            Self::ApplicationError(_) => "Application error",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

impl From<JsonRpcErrorCode> for JsonRpcError {
    fn from(code: JsonRpcErrorCode) -> Self {
        Self::new(code.code(), code.message())
    }
}

impl From<i32> for JsonRpcErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::ConnectionClosed,
            -32001 => Self::RequestTimeout,
            other => Self::ApplicationError(other),
        }
    }
}

/// Outcome of structural classification of an inbound document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Has `method` and `id`, neither `result` nor `error`
    Request,
    /// Has `method`, no `id`
    Notification,
    /// Has `id` and `result`, no `error`
    Response,
    /// Has `id` and `error`, no `result`
    ErrorMessage,
    /// Anything else, including non-objects
    Invalid,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "request",
            Self::Notification => "notification",
            Self::Response => "response",
            Self::ErrorMessage => "error",
            Self::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Classify a JSON document by which members it carries.
///
/// Only member presence is inspected; member types are checked later by
/// typed deserialization.
pub fn classify(doc: &Value) -> MessageKind {
    let Some(obj) = doc.as_object() else {
        return MessageKind::Invalid;
    };

    let method = obj.contains_key("method");
    let id = obj.contains_key("id");
    let result = obj.contains_key("result");
    let error = obj.contains_key("error");

    if method && id && !result && !error {
        MessageKind::Request
    } else if method && !id {
        MessageKind::Notification
    } else if id && result && !error {
        MessageKind::Response
    } else if id && error && !result {
        MessageKind::ErrorMessage
    } else {
        MessageKind::Invalid
    }
}

/// Recover a usable request id from an arbitrary document, if it carries one.
pub fn recover_id(doc: &Value) -> Option<RequestId> {
    doc.get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
}

/// One MCP message: request, notification, response or error message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request message
    Request(JsonRpcRequest),
    /// Notification message
    Notification(JsonRpcNotification),
    /// Success reply
    Response(JsonRpcResponse),
    /// Failure reply
    Error(JsonRpcErrorResponse),
}

impl JsonRpcMessage {
    /// Build a typed message from a parsed document.
    ///
    /// Fails with a `ParseError` when the document classifies as invalid or a
    /// required member is missing or mistyped.
    pub fn from_value(value: Value) -> McpResult<Self> {
        let kind = classify(&value);
        let parsed = match kind {
            MessageKind::Request => serde_json::from_value(value).map(Self::Request),
            MessageKind::Notification => serde_json::from_value(value).map(Self::Notification),
            MessageKind::Response => serde_json::from_value(value).map(Self::Response),
            MessageKind::ErrorMessage => serde_json::from_value(value).map(Self::Error),
            MessageKind::Invalid => {
                return Err(McpError::parse_error(
                    "document is not a JSON-RPC request, notification, response or error",
                ));
            }
        };
        parsed.map_err(|e| McpError::parse_error(format!("malformed {kind}: {e}")))
    }

    /// Serialize into a JSON document
    pub fn to_value(&self) -> McpResult<Value> {
        serde_json::to_value(self).map_err(McpError::from)
    }

    /// Message kind
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request(_) => MessageKind::Request,
            Self::Notification(_) => MessageKind::Notification,
            Self::Response(_) => MessageKind::Response,
            Self::Error(_) => MessageKind::ErrorMessage,
        }
    }

    /// Request id, if the message carries one
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Notification(_) => None,
            Self::Response(r) => Some(&r.id),
            Self::Error(e) => e.id.as_ref(),
        }
    }

    /// Method name, for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(|e| serde::de::Error::custom(e.message))
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        Self::Notification(notification)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

impl From<JsonRpcErrorResponse> for JsonRpcMessage {
    fn from(error: JsonRpcErrorResponse) -> Self {
        Self::Error(error)
    }
}

/// A non-empty, ordered sequence of messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JsonRpcBatch {
    items: Vec<JsonRpcMessage>,
}

impl JsonRpcBatch {
    /// Create a batch; an empty sequence is a protocol violation.
    pub fn new(items: Vec<JsonRpcMessage>) -> McpResult<Self> {
        if items.is_empty() {
            return Err(McpError::invalid_request("empty batch"));
        }
        Ok(Self { items })
    }

    /// Number of messages in the batch
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false for a constructed batch
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the messages in order
    pub fn iter(&self) -> impl Iterator<Item = &JsonRpcMessage> {
        self.items.iter()
    }

    /// Take the messages out of the batch
    pub fn into_inner(self) -> Vec<JsonRpcMessage> {
        self.items
    }
}

impl IntoIterator for JsonRpcBatch {
    type Item = JsonRpcMessage;
    type IntoIter = std::vec::IntoIter<JsonRpcMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'de> Deserialize<'de> for JsonRpcBatch {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = Vec::<JsonRpcMessage>::deserialize(deserializer)?;
        Self::new(items).map_err(|e| serde::de::Error::custom(e.message))
    }
}

/// What travels as one unit on the wire: a single message or a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcPayload {
    /// A single message
    Single(JsonRpcMessage),
    /// A batch of messages
    Batch(JsonRpcBatch),
}

impl JsonRpcPayload {
    /// Build a payload from a parsed document
    pub fn from_value(value: Value) -> McpResult<Self> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(McpError::parse_error("empty batch"));
                }
                let messages = items
                    .into_iter()
                    .map(JsonRpcMessage::from_value)
                    .collect::<McpResult<Vec<_>>>()?;
                Ok(Self::Batch(JsonRpcBatch::new(messages)?))
            }
            other => JsonRpcMessage::from_value(other).map(Self::Single),
        }
    }

    /// Iterate over the contained messages in order
    pub fn messages(&self) -> Box<dyn Iterator<Item = &JsonRpcMessage> + '_> {
        match self {
            Self::Single(message) => Box::new(std::iter::once(message)),
            Self::Batch(batch) => Box::new(batch.iter()),
        }
    }

    /// Ids of every request in the payload
    pub fn request_ids(&self) -> Vec<RequestId> {
        self.messages()
            .filter_map(|m| match m {
                JsonRpcMessage::Request(r) => Some(r.id.clone()),
                _ => None,
            })
            .collect()
    }

    /// True when the payload contains at least one request
    pub fn has_requests(&self) -> bool {
        self.messages()
            .any(|m| matches!(m, JsonRpcMessage::Request(_)))
    }
}

impl<'de> Deserialize<'de> for JsonRpcPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(|e| serde::de::Error::custom(e.message))
    }
}

impl From<JsonRpcMessage> for JsonRpcPayload {
    fn from(message: JsonRpcMessage) -> Self {
        Self::Single(message)
    }
}

impl From<JsonRpcBatch> for JsonRpcPayload {
    fn from(batch: JsonRpcBatch) -> Self {
        Self::Batch(batch)
    }
}

/// Utility functions for JSON-RPC text
pub mod utils {
    use super::*;

    /// Parse a single message from text
    pub fn parse_message(json: &str) -> McpResult<JsonRpcMessage> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| McpError::parse_error(format!("Invalid JSON: {e}")))?;
        JsonRpcMessage::from_value(value)
    }

    /// Parse a single message or a batch from text
    pub fn parse_payload(json: &str) -> McpResult<JsonRpcPayload> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| McpError::parse_error(format!("Invalid JSON: {e}")))?;
        JsonRpcPayload::from_value(value)
    }

    /// Serialize a single message to text
    pub fn serialize_message(message: &JsonRpcMessage) -> McpResult<String> {
        serde_json::to_string(message).map_err(McpError::from)
    }

    /// Serialize a payload to text
    pub fn serialize_payload(payload: &JsonRpcPayload) -> McpResult<String> {
        serde_json::to_string(payload).map_err(McpError::from)
    }

    /// Check if a string looks like a JSON-RPC batch
    pub fn is_batch(json: &str) -> bool {
        json.trim_start().starts_with('[')
    }
}
