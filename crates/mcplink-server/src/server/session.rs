//! One served MCP session and the server-initiated traffic it can send.

use std::sync::Arc;

use mcplink_core::{ProtocolEngine, RequestOptions, SessionState};
use mcplink_protocol::types::{LoggingMessageNotification, ResourceUpdatedNotification};
use mcplink_protocol::{ClientCapabilities, Implementation, LoggingLevel, McpResult, methods};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

/// A live session with one client.
///
/// Cheap to clone. Requests to the client go through the capability gate:
/// `create_message` against a client without `sampling` fails locally with
/// `CapabilityNotSupported`.
#[derive(Debug, Clone)]
pub struct ServerSession {
    engine: ProtocolEngine,
    log_level: Arc<RwLock<Option<LoggingLevel>>>,
}

impl ServerSession {
    pub(crate) fn new(
        engine: ProtocolEngine,
        log_level: Arc<RwLock<Option<LoggingLevel>>>,
    ) -> Self {
        Self { engine, log_level }
    }

    /// The engine driving this session
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    /// Capabilities the client announced, once it has initialized
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.engine
            .session()
            .negotiated()
            .map(|n| n.capabilities.client)
    }

    /// The client's `clientInfo`
    pub fn client_info(&self) -> Option<Implementation> {
        self.engine.session().negotiated().map(|n| n.peer_info)
    }

    /// Version agreed during the handshake
    pub fn protocol_version(&self) -> Option<String> {
        self.engine
            .session()
            .negotiated()
            .map(|n| n.protocol_version)
    }

    /// Minimum level the client asked for with `logging/setLevel`
    pub fn logging_level(&self) -> Option<LoggingLevel> {
        *self.log_level.read()
    }

    // ============================================================================
    // NOTIFICATIONS
    // ============================================================================

    /// Send any notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.engine.send_notification(method, params, None).await
    }

    /// `notifications/resources/updated` for `uri`
    pub async fn notify_resource_updated(&self, uri: &str) -> McpResult<()> {
        let params = serde_json::to_value(ResourceUpdatedNotification {
            uri: uri.to_string(),
        })?;
        self.notify(methods::NOTIFICATION_RESOURCES_UPDATED, Some(params))
            .await
    }

    /// `notifications/resources/list_changed`
    pub async fn notify_resources_list_changed(&self) -> McpResult<()> {
        self.notify(methods::NOTIFICATION_RESOURCES_LIST_CHANGED, None)
            .await
    }

    /// `notifications/tools/list_changed`; needs `tools.listChanged`
    pub async fn notify_tools_list_changed(&self) -> McpResult<()> {
        self.notify(methods::NOTIFICATION_TOOLS_LIST_CHANGED, None)
            .await
    }

    /// `notifications/prompts/list_changed`; needs `prompts.listChanged`
    pub async fn notify_prompts_list_changed(&self) -> McpResult<()> {
        self.notify(methods::NOTIFICATION_PROMPTS_LIST_CHANGED, None)
            .await
    }

    /// Send a `notifications/message` log entry.
    ///
    /// Entries below the level set by the client are dropped without error.
    pub async fn send_log_message(
        &self,
        level: LoggingLevel,
        logger: Option<&str>,
        data: Value,
    ) -> McpResult<()> {
        if self.logging_level().is_some_and(|minimum| level < minimum) {
            trace!(%level, "log message below client level");
            return Ok(());
        }
        let params = serde_json::to_value(LoggingMessageNotification {
            level,
            logger: logger.map(str::to_string),
            data,
        })?;
        self.notify(methods::NOTIFICATION_MESSAGE, Some(params)).await
    }

    // ============================================================================
    // REQUESTS TO THE CLIENT
    // ============================================================================

    /// Send any request with explicit options
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        self.engine.send_request(method, params, options).await
    }

    /// `sampling/createMessage`; needs client `sampling`
    pub async fn create_message(&self, params: Value) -> McpResult<Value> {
        self.request(
            methods::SAMPLING_CREATE_MESSAGE,
            Some(params),
            RequestOptions::default(),
        )
        .await
    }

    /// `roots/list`; needs client `roots`
    pub async fn list_roots(&self) -> McpResult<Value> {
        self.request(methods::ROOTS_LIST, None, RequestOptions::default())
            .await
    }

    /// `elicitation/create`; needs client `elicitation`
    pub async fn elicit(&self, params: Value) -> McpResult<Value> {
        self.request(
            methods::ELICITATION_CREATE,
            Some(params),
            RequestOptions::default(),
        )
        .await
    }

    // ============================================================================
    // LIFECYCLE
    // ============================================================================

    /// Gracefully end the session
    pub async fn shutdown(&self) -> McpResult<()> {
        self.engine.shutdown().await
    }

    /// Resolves once the client disconnects or the session shuts down
    pub async fn wait_closed(&self) {
        self.engine.wait_closed().await;
    }
}
