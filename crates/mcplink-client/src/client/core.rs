//! Core client implementation: handshake, connection state and reconnection.

use std::fmt;
use std::sync::Arc;

use mcplink_core::{
    EngineConfig, Negotiated, NotificationHandler, ProtocolEngine, RequestContext, RequestHandler,
    RequestOptions, Session, SessionState,
};
use mcplink_protocol::{
    ClientCapabilities, Implementation, InitializeRequest, InitializeResult, McpError, McpResult,
    NegotiatedCapabilities, Role, ServerCapabilities, is_supported_version, methods,
};
use mcplink_transport_traits::Transport;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::builder::{ClientBuilder, InitializedHook, TransportFactory};
use super::config::ClientConfig;

/// Everything a connection is built from; survives reconnects
struct Settings {
    info: Implementation,
    capabilities: ClientCapabilities,
    config: ClientConfig,
    request_handlers: Vec<(String, Arc<dyn RequestHandler>)>,
    notification_handlers: Vec<(String, Arc<dyn NotificationHandler>)>,
    on_initialized: Option<InitializedHook>,
    factory: Option<TransportFactory>,
}

struct ClientInner {
    settings: Settings,
    engine: RwLock<ProtocolEngine>,
    reconnect_lock: tokio::sync::Mutex<()>,
}

/// A connected MCP client.
///
/// Cheap to clone; clones share the connection. Every typed method runs the
/// capability gate before anything is written, so calling `subscribe` on a
/// server without `resources.subscribe` fails locally with
/// `CapabilityNotSupported`.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("info", &self.inner.settings.info)
            .field("engine", &*self.inner.engine.read())
            .finish()
    }
}

impl Client {
    /// Start configuring a client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) async fn connect(
        builder: ClientBuilder,
        transport: Arc<dyn Transport>,
        factory: Option<TransportFactory>,
    ) -> McpResult<Self> {
        let ClientBuilder {
            info,
            capabilities,
            config,
            request_handlers,
            notification_handlers,
            on_initialized,
        } = builder;
        let info = info.unwrap_or_else(|| {
            Implementation::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        });

        let settings = Settings {
            info,
            capabilities,
            config,
            request_handlers,
            notification_handlers,
            on_initialized,
            factory,
        };
        let engine = settings.open(transport, 0)?;
        settings.handshake(&engine).await?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                settings,
                engine: RwLock::new(engine),
                reconnect_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// The engine driving the current connection
    pub fn engine(&self) -> ProtocolEngine {
        self.inner.engine.read().clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.engine().state()
    }

    /// Capabilities this client advertised
    pub fn capabilities(&self) -> &ClientCapabilities {
        &self.inner.settings.capabilities
    }

    /// The client's configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.settings.config
    }

    fn negotiated(&self) -> Option<Negotiated> {
        self.engine().session().negotiated()
    }

    /// Capabilities the server announced
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.negotiated().map(|n| n.capabilities.server)
    }

    /// The server's `serverInfo`
    pub fn server_info(&self) -> Option<Implementation> {
        self.negotiated().map(|n| n.peer_info)
    }

    /// Usage hints the server sent with its `initialize` result
    pub fn instructions(&self) -> Option<String> {
        self.negotiated().and_then(|n| n.instructions)
    }

    /// Version agreed during the handshake
    pub fn protocol_version(&self) -> Option<String> {
        self.negotiated().map(|n| n.protocol_version)
    }

    /// Send any request with explicit options.
    ///
    /// The configured progress ceiling applies unless `options` sets its own.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        mut options: RequestOptions,
    ) -> McpResult<Value> {
        if options.max_total_timeout.is_none() {
            options.max_total_timeout = self.inner.settings.config.max_total_timeout();
        }
        self.engine().send_request(method, params, options).await
    }

    /// Send any notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.engine().send_notification(method, params, None).await
    }

    /// Re-establish the connection.
    ///
    /// With a transport session id the negotiated state is kept and the
    /// handshake skipped; the peer resumes the same session. Without one the
    /// client starts over from `Connecting` on a transport from the factory
    /// given to [`ClientBuilder::connect_with`], or on the old transport when
    /// there is no factory.
    pub async fn reconnect(&self) -> McpResult<()> {
        let _guard = self.inner.reconnect_lock.lock().await;
        let old = self.engine();
        let transport = Arc::clone(old.transport());
        let session_id = transport.session_id();
        let last_event_id = transport.last_event_id();
        let negotiated = old.session().negotiated();
        let next_id = old.next_request_id();

        // Closing the old run must not end the peer's session.
        if session_id.is_some() {
            transport.set_session_id(None);
        }
        if let Err(error) = old.close().await {
            debug!(%error, "closing previous connection failed");
        }

        let transport = match &self.inner.settings.factory {
            Some(factory) => factory()?,
            None => transport,
        };

        let engine = match (session_id, negotiated) {
            (Some(session_id), Some(negotiated)) => {
                info!(%session_id, ?last_event_id, "resuming session");
                transport.set_session_id(Some(session_id));
                if let Some(last_event_id) = last_event_id {
                    transport.resume(last_event_id).await?;
                }
                let engine = self.inner.settings.open(transport, next_id)?;
                *self.inner.engine.write() = engine.clone();
                engine.start().await?;
                let session = engine.session();
                session.transition(SessionState::Connecting, SessionState::Initializing)?;
                session.complete_handshake(negotiated)?;
                session.transition(SessionState::Initializing, SessionState::Initialized)?;
                session.transition(SessionState::Initialized, SessionState::Operating)?;
                engine
            }
            _ => {
                info!("restarting session");
                let engine = self.inner.settings.open(transport, next_id)?;
                *self.inner.engine.write() = engine.clone();
                self.inner.settings.handshake(&engine).await?;
                engine
            }
        };
        debug!(state = %engine.state(), "reconnected");
        Ok(())
    }

    /// Gracefully end the session: pending calls fail with
    /// "connection closing" and the transport is closed
    pub async fn shutdown(&self) -> McpResult<()> {
        self.engine().shutdown().await
    }

    /// Resolves once the current connection has closed
    pub async fn wait_closed(&self) {
        let engine = self.engine();
        engine.wait_closed().await;
    }
}

impl Settings {
    /// Build an engine over `transport` with the client's handlers installed
    fn open(
        &self,
        transport: Arc<dyn Transport>,
        first_request_id: i64,
    ) -> McpResult<ProtocolEngine> {
        let session = Session::new(Role::Client)
            .with_strict_capabilities(self.config.strict_capabilities)
            .with_client_capabilities(self.capabilities.clone());
        let engine = ProtocolEngine::with_config(
            transport,
            Arc::new(session),
            EngineConfig {
                request_timeout: self.config.request_timeout(),
                first_request_id,
            },
        );

        for (method, handler) in &self.request_handlers {
            let handler = Arc::clone(handler);
            engine.set_request_handler(
                method.clone(),
                move |params: Option<Value>, ctx: RequestContext| {
                    let handler = Arc::clone(&handler);
                    async move { handler.handle(params, ctx).await }
                },
            )?;
        }
        for (method, handler) in &self.notification_handlers {
            let handler = Arc::clone(handler);
            engine.set_notification_handler(method.clone(), move |params: Option<Value>| {
                let handler = Arc::clone(&handler);
                async move { handler.handle(params).await }
            })?;
        }
        engine.on_error(|error| warn!(%error, "client connection error"));
        Ok(engine)
    }

    /// Start `engine` and run `initialize` / `notifications/initialized`
    async fn handshake(&self, engine: &ProtocolEngine) -> McpResult<InitializeResult> {
        engine.start().await?;
        match self.initialize(engine).await {
            Ok(result) => Ok(result),
            Err(error) => {
                warn!(%error, "initialize handshake failed");
                let _ = engine.session().force(SessionState::Error);
                if let Err(close_error) = engine.close().await {
                    debug!(error = %close_error, "closing after failed handshake");
                }
                Err(error)
            }
        }
    }

    async fn initialize(&self, engine: &ProtocolEngine) -> McpResult<InitializeResult> {
        let session = engine.session();
        session.transition(SessionState::Connecting, SessionState::Initializing)?;

        let request = InitializeRequest {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: self.capabilities.clone(),
            client_info: self.info.clone(),
            meta: None,
        };
        debug!(version = %request.protocol_version, "sending initialize");
        let result = engine
            .send_request(
                methods::INITIALIZE,
                Some(serde_json::to_value(&request)?),
                RequestOptions::new().with_timeout(self.config.init_timeout()),
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(result)?;

        if !is_supported_version(&result.protocol_version) {
            return Err(McpError::unsupported_protocol_version(
                result.protocol_version,
            ));
        }

        let negotiated = Negotiated {
            capabilities: NegotiatedCapabilities::new(
                self.capabilities.clone(),
                result.capabilities.clone(),
            ),
            protocol_version: result.protocol_version.clone(),
            peer_info: result.server_info.clone(),
            instructions: result.instructions.clone(),
        };
        session.complete_handshake(negotiated.clone())?;
        engine
            .send_notification(methods::NOTIFICATION_INITIALIZED, None, None)
            .await?;
        session.transition(SessionState::Initializing, SessionState::Initialized)?;

        if let Some(hook) = &self.on_initialized {
            hook(&negotiated);
        }
        session.transition(SessionState::Initialized, SessionState::Operating)?;
        info!(
            server = %result.server_info.name,
            version = %result.protocol_version,
            "connected to MCP server"
        );
        Ok(result)
    }
}
