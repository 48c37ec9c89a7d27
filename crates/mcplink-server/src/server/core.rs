//! Core server implementation: the `initialize` handler and the lifecycle
//! around one served session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mcplink_core::{
    EngineConfig, Negotiated, NotificationHandler, ProtocolEngine, RequestContext, RequestHandler,
    Session, SessionState,
};
use mcplink_protocol::types::SetLevelRequest;
use mcplink_protocol::{
    Implementation, InitializeRequest, InitializeResult, LoggingLevel, McpError, McpResult,
    NegotiatedCapabilities, Role, ServerCapabilities, methods, negotiate_version,
};
use mcplink_transport_traits::Transport;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::builder::{InitializedHook, ServerBuilder};
use super::session::ServerSession;

pub(crate) struct ServerInner {
    pub(crate) info: Implementation,
    pub(crate) capabilities: ServerCapabilities,
    pub(crate) instructions: Option<String>,
    pub(crate) request_timeout: Duration,
    pub(crate) strict_capabilities: bool,
    pub(crate) request_handlers: Vec<(String, Arc<dyn RequestHandler>)>,
    pub(crate) notification_handlers: Vec<(String, Arc<dyn NotificationHandler>)>,
    pub(crate) on_initialized: Option<InitializedHook>,
}

/// An MCP server definition.
///
/// Cheap to clone. Each call to [`serve`](Self::serve) runs an independent
/// session over its own transport with the same handlers.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("info", &self.inner.info)
            .field("capabilities", &self.inner.capabilities)
            .finish()
    }
}

impl Server {
    /// Start configuring a server
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn from_inner(inner: ServerInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The `serverInfo` sent during the handshake
    pub fn info(&self) -> &Implementation {
        &self.inner.info
    }

    /// Capabilities announced during the handshake
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.inner.capabilities
    }

    /// Usage hints sent during the handshake
    pub fn instructions(&self) -> Option<&str> {
        self.inner.instructions.as_deref()
    }

    /// Serve one session over `transport`
    pub async fn serve(&self, transport: impl Transport + 'static) -> McpResult<ServerSession> {
        self.serve_shared(Arc::new(transport)).await
    }

    /// Serve one session over an already shared transport.
    ///
    /// Handlers are registered before the transport starts, so a handler the
    /// advertised capabilities do not cover fails here with
    /// `CapabilityNotSupported` and nothing is read.
    pub async fn serve_shared(&self, transport: Arc<dyn Transport>) -> McpResult<ServerSession> {
        let session = Session::new(Role::Server)
            .with_strict_capabilities(self.inner.strict_capabilities)
            .with_server_capabilities(self.inner.capabilities.clone());
        let engine = ProtocolEngine::with_config(
            transport,
            Arc::new(session),
            EngineConfig {
                request_timeout: self.inner.request_timeout,
                ..EngineConfig::default()
            },
        );
        let log_level = Arc::new(RwLock::new(None));

        self.install_lifecycle(&engine)?;
        self.install_handlers(&engine, &log_level)?;
        engine.on_error(|error| warn!(%error, "server connection error"));

        engine.start().await?;
        enter_initializing(engine.session());
        debug!(server = %self.inner.info.name, "serving session");

        Ok(ServerSession::new(engine, log_level))
    }

    fn install_lifecycle(&self, engine: &ProtocolEngine) -> McpResult<()> {
        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(engine.session());
        engine.set_request_handler(
            methods::INITIALIZE,
            move |params: Option<Value>, _ctx: RequestContext| {
                let inner = Arc::clone(&inner);
                let session = Arc::clone(&session);
                async move { inner.initialize(&session, params) }
            },
        )?;

        // The engine flips Initializing -> Initialized itself; this handler
        // runs the hook and opens the session for traffic.
        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(engine.session());
        let chained = self
            .inner
            .notification_handlers
            .iter()
            .find(|(method, _)| method == methods::NOTIFICATION_INITIALIZED)
            .map(|(_, handler)| Arc::clone(handler));
        engine.set_notification_handler(
            methods::NOTIFICATION_INITIALIZED,
            move |params: Option<Value>| {
                client_initialized(
                    Arc::clone(&inner),
                    Arc::clone(&session),
                    chained.clone(),
                    params,
                )
            },
        )
    }

    fn install_handlers(
        &self,
        engine: &ProtocolEngine,
        log_level: &Arc<RwLock<Option<LoggingLevel>>>,
    ) -> McpResult<()> {
        for (method, handler) in &self.inner.request_handlers {
            let handler = Arc::clone(handler);
            engine.set_request_handler(
                method.clone(),
                move |params: Option<Value>, ctx: RequestContext| {
                    let handler = Arc::clone(&handler);
                    async move { handler.handle(params, ctx).await }
                },
            )?;
        }
        for (method, handler) in &self.inner.notification_handlers {
            if method == methods::NOTIFICATION_INITIALIZED {
                continue;
            }
            let handler = Arc::clone(handler);
            engine.set_notification_handler(method.clone(), move |params: Option<Value>| {
                let handler = Arc::clone(&handler);
                async move { handler.handle(params).await }
            })?;
        }

        let custom_set_level = self
            .inner
            .request_handlers
            .iter()
            .any(|(method, _)| method == methods::LOGGING_SET_LEVEL);
        if self.inner.capabilities.logging.is_some() && !custom_set_level {
            let log_level = Arc::clone(log_level);
            engine.set_request_handler(
                methods::LOGGING_SET_LEVEL,
                move |params: Option<Value>, _ctx: RequestContext| {
                    let log_level = Arc::clone(&log_level);
                    async move { set_level(&log_level, params) }
                },
            )?;
        }
        Ok(())
    }
}

impl ServerInner {
    fn initialize(&self, session: &Session, params: Option<Value>) -> McpResult<Value> {
        enter_initializing(session);
        let request: InitializeRequest = parse_params(params)?;
        let version = negotiate_version(&request.protocol_version);
        if version != request.protocol_version {
            debug!(
                requested = %request.protocol_version,
                offered = version,
                "client asked for an unsupported protocol version"
            );
        }

        session.complete_handshake(Negotiated {
            capabilities: NegotiatedCapabilities::new(
                request.capabilities,
                self.capabilities.clone(),
            ),
            protocol_version: version.to_string(),
            peer_info: request.client_info.clone(),
            instructions: self.instructions.clone(),
        })?;
        info!(
            client = %request.client_info.name,
            client_version = %request.client_info.version,
            protocol_version = version,
            "client initializing"
        );

        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
            meta: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    fn client_initialized(&self, session: &Session) -> McpResult<()> {
        let Some(negotiated) = session.negotiated() else {
            return Err(McpError::not_initialized());
        };
        if let Some(hook) = &self.on_initialized {
            hook(&negotiated);
        }
        session.transition(SessionState::Initialized, SessionState::Operating)?;
        info!(client = %negotiated.peer_info.name, "session operating");
        Ok(())
    }
}

async fn client_initialized(
    inner: Arc<ServerInner>,
    session: Arc<Session>,
    chained: Option<Arc<dyn NotificationHandler>>,
    params: Option<Value>,
) -> McpResult<()> {
    inner.client_initialized(&session)?;
    match chained {
        Some(handler) => handler.handle(params).await,
        None => Ok(()),
    }
}

fn set_level(log_level: &RwLock<Option<LoggingLevel>>, params: Option<Value>) -> McpResult<Value> {
    let request: SetLevelRequest = parse_params(params)?;
    debug!(level = %request.level, "client set logging level");
    *log_level.write() = Some(request.level);
    Ok(json!({}))
}

/// `Connecting -> Initializing`, from whichever of the transport start or the
/// first `initialize` comes first
fn enter_initializing(session: &Session) {
    if session.state() == SessionState::Connecting {
        let _ = session.transition(SessionState::Connecting, SessionState::Initializing);
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> McpResult<T> {
    let params = params.ok_or_else(|| McpError::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|e| McpError::invalid_params(e.to_string()))
}
