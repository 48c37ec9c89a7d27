//! Client builder pattern for MCP client construction
//!
//! Provides a fluent interface for configuring client options before the
//! handshake runs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mcplink_core::{Negotiated, NotificationHandler, RequestHandler};
use mcplink_protocol::{ClientCapabilities, Implementation, McpResult, methods};
use mcplink_transport_traits::Transport;

use super::config::ClientConfig;
use super::core::Client;

/// Hook run after the handshake, right before the session starts operating
pub type InitializedHook = Arc<dyn Fn(&Negotiated) + Send + Sync>;

/// Produces a fresh transport for a full reconnect
pub type TransportFactory = Arc<dyn Fn() -> McpResult<Arc<dyn Transport>> + Send + Sync>;

/// Builder for configuring and connecting MCP clients
///
/// Registering a handler for a server-initiated request also advertises the
/// capability it needs, so `on_sampling` alone is enough to receive
/// `sampling/createMessage`.
///
/// # Examples
///
/// ```rust,no_run
/// use mcplink_client::Client;
/// use mcplink_core::RequestContext;
/// use mcplink_protocol::{Implementation, McpResult};
/// use mcplink_transport_traits::InMemoryTransport;
/// use serde_json::{Value, json};
/// use std::time::Duration;
///
/// # async fn example() -> McpResult<()> {
/// let (transport, _server_side) = InMemoryTransport::pair();
/// let client = Client::builder()
///     .client_info(Implementation::new("my-host", "1.0.0"))
///     .request_timeout(Duration::from_secs(30))
///     .on_sampling(|_params: Option<Value>, _ctx: RequestContext| async move {
///         McpResult::Ok(json!({"role": "assistant", "content": {"type": "text", "text": "hi"}}))
///     })
///     .connect(transport)
///     .await?;
/// let tools = client.list_tools(None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    pub(crate) info: Option<Implementation>,
    pub(crate) capabilities: ClientCapabilities,
    pub(crate) config: ClientConfig,
    pub(crate) request_handlers: Vec<(String, Arc<dyn RequestHandler>)>,
    pub(crate) notification_handlers: Vec<(String, Arc<dyn NotificationHandler>)>,
    pub(crate) on_initialized: Option<InitializedHook>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requests: Vec<&str> = self.request_handlers.iter().map(|(m, _)| m.as_str()).collect();
        let notifications: Vec<&str> = self
            .notification_handlers
            .iter()
            .map(|(m, _)| m.as_str())
            .collect();
        f.debug_struct("ClientBuilder")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .field("config", &self.config)
            .field("request_handlers", &requests)
            .field("notification_handlers", &notifications)
            .field("on_initialized", &self.on_initialized.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    // ============================================================================
    // IDENTITY AND CAPABILITIES
    // ============================================================================

    /// Name and version sent as `clientInfo`
    pub fn client_info(mut self, info: Implementation) -> Self {
        self.info = Some(info);
        self
    }

    /// Replace the advertised capabilities
    ///
    /// Handlers registered later still add the capabilities they need.
    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    // ============================================================================
    // CONNECTION CONFIGURATION
    // ============================================================================

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Default timeout for requests that do not set their own
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Protocol version requested during `initialize`
    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config.protocol_version = version.into();
        self
    }

    /// Reject methods missing from the capability table instead of passing
    /// them through
    pub fn strict_capabilities(mut self, strict: bool) -> Self {
        self.config.strict_capabilities = strict;
        self
    }

    /// Run `hook` once the handshake completes
    pub fn on_initialized(mut self, hook: impl Fn(&Negotiated) + Send + Sync + 'static) -> Self {
        self.on_initialized = Some(Arc::new(hook));
        self
    }

    // ============================================================================
    // SERVER-INITIATED REQUESTS
    // ============================================================================

    /// Answer `sampling/createMessage`; advertises `sampling`
    pub fn on_sampling(mut self, handler: impl RequestHandler) -> Self {
        if self.capabilities.sampling.is_none() {
            self.capabilities = self.capabilities.enable_sampling();
        }
        self.request_handler(methods::SAMPLING_CREATE_MESSAGE, handler)
    }

    /// Answer `roots/list`; advertises `roots`
    pub fn on_roots_list(mut self, handler: impl RequestHandler) -> Self {
        if self.capabilities.roots.is_none() {
            self.capabilities = self.capabilities.enable_roots(false);
        }
        self.request_handler(methods::ROOTS_LIST, handler)
    }

    /// Answer `elicitation/create`; advertises `elicitation`
    pub fn on_elicitation(mut self, handler: impl RequestHandler) -> Self {
        if self.capabilities.elicitation.is_none() {
            self.capabilities = self.capabilities.enable_elicitation();
        }
        self.request_handler(methods::ELICITATION_CREATE, handler)
    }

    /// Answer any other server-initiated request
    pub fn request_handler(
        mut self,
        method: impl Into<String>,
        handler: impl RequestHandler,
    ) -> Self {
        self.request_handlers.push((method.into(), Arc::new(handler)));
        self
    }

    /// Consume a server notification such as `notifications/message` or
    /// `notifications/tools/list_changed`
    pub fn notification_handler(
        mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler,
    ) -> Self {
        self.notification_handlers
            .push((method.into(), Arc::new(handler)));
        self
    }

    // ============================================================================
    // CONNECT
    // ============================================================================

    /// Start `transport` and run the initialize handshake
    pub async fn connect(self, transport: impl Transport + 'static) -> McpResult<Client> {
        Client::connect(self, Arc::new(transport), None).await
    }

    /// Like [`connect`](Self::connect), keeping `factory` to build a fresh
    /// transport when [`Client::reconnect`] needs one
    pub async fn connect_with(
        self,
        factory: impl Fn() -> McpResult<Arc<dyn Transport>> + Send + Sync + 'static,
    ) -> McpResult<Client> {
        let factory: TransportFactory = Arc::new(factory);
        let transport = factory()?;
        Client::connect(self, transport, Some(factory)).await
    }
}
