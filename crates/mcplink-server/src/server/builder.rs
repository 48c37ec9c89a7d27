//! Server builder pattern for MCP server construction
//!
//! Provides a fluent builder API for identity, capabilities and handlers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mcplink_core::{Negotiated, NotificationHandler, RequestHandler};
use mcplink_protocol::{DEFAULT_REQUEST_TIMEOUT_MS, Implementation, ServerCapabilities};

use super::core::{Server, ServerInner};
use crate::config::ServerConfig;

/// Hook run once the client's `notifications/initialized` arrives
pub type InitializedHook = Arc<dyn Fn(&Negotiated) + Send + Sync>;

/// Builder for constructing MCP servers
///
/// Handlers are checked against the advertised capabilities when a session
/// is served: a `tools/list` handler without `tools` fails `serve` with
/// `CapabilityNotSupported`.
///
/// # Examples
///
/// ```rust,no_run
/// use mcplink_core::RequestContext;
/// use mcplink_protocol::{Implementation, McpResult, ServerCapabilities};
/// use mcplink_server::Server;
/// use serde_json::{Value, json};
///
/// let server = Server::builder()
///     .server_info(Implementation::new("calculator", "1.0.0"))
///     .capabilities(ServerCapabilities::default().enable_tools(false))
///     .instructions("Call add with two numbers")
///     .request_handler("tools/list", |_params: Option<Value>, _ctx: RequestContext| async move {
///         McpResult::Ok(json!({"tools": [{"name": "add", "inputSchema": {"type": "object"}}]}))
///     })
///     .build();
/// ```
pub struct ServerBuilder {
    info: Implementation,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    request_timeout: Duration,
    strict_capabilities: bool,
    request_handlers: Vec<(String, Arc<dyn RequestHandler>)>,
    notification_handlers: Vec<(String, Arc<dyn NotificationHandler>)>,
    on_initialized: Option<InitializedHook>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requests: Vec<&str> = self.request_handlers.iter().map(|(m, _)| m.as_str()).collect();
        f.debug_struct("ServerBuilder")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .field("request_timeout", &self.request_timeout)
            .field("request_handlers", &requests)
            .finish()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            info: Implementation::new(crate::SERVER_NAME, crate::SERVER_VERSION),
            capabilities: ServerCapabilities::default(),
            instructions: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            strict_capabilities: false,
            request_handlers: Vec::new(),
            notification_handlers: Vec::new(),
            on_initialized: None,
        }
    }
}

impl ServerBuilder {
    /// Create a new server builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded [`ServerConfig`]: name, version, instructions,
    /// request timeout and strictness
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            info: Implementation::new(&config.name, &config.version),
            instructions: config.instructions.clone(),
            request_timeout: config.request_timeout(),
            strict_capabilities: config.strict_capabilities,
            ..Self::default()
        }
    }

    /// Name and version sent as `serverInfo`
    #[must_use]
    pub fn server_info(mut self, info: Implementation) -> Self {
        self.info = info;
        self
    }

    /// Capabilities announced in the `initialize` result
    #[must_use]
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Usage hints for the client's model
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Default timeout for server-initiated requests
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Reject methods missing from the capability table instead of passing
    /// them through
    #[must_use]
    pub fn strict_capabilities(mut self, strict: bool) -> Self {
        self.strict_capabilities = strict;
        self
    }

    /// Answer request `method`
    #[must_use]
    pub fn request_handler(
        mut self,
        method: impl Into<String>,
        handler: impl RequestHandler,
    ) -> Self {
        self.request_handlers.push((method.into(), Arc::new(handler)));
        self
    }

    /// Consume notification `method`
    #[must_use]
    pub fn notification_handler(
        mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler,
    ) -> Self {
        self.notification_handlers
            .push((method.into(), Arc::new(handler)));
        self
    }

    /// Run `hook` when the client finishes the handshake
    #[must_use]
    pub fn on_initialized(mut self, hook: impl Fn(&Negotiated) + Send + Sync + 'static) -> Self {
        self.on_initialized = Some(Arc::new(hook));
        self
    }

    /// Finish configuration. The server can serve any number of sessions.
    pub fn build(self) -> Server {
        Server::from_inner(ServerInner {
            info: self.info,
            capabilities: self.capabilities,
            instructions: self.instructions,
            request_timeout: self.request_timeout,
            strict_capabilities: self.strict_capabilities,
            request_handlers: self.request_handlers,
            notification_handlers: self.notification_handlers,
            on_initialized: self.on_initialized,
        })
    }
}
