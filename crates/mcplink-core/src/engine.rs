//! Protocol engine: request correlation and inbound dispatch.
//!
//! The engine sits between a [`Transport`] and the facades. Outbound requests
//! get a monotonic id and a one-shot slot in the pending map before a single
//! byte is written; inbound documents are pushed by the transport into a queue
//! drained by one dispatcher task, which
//!
//! - resolves replies against the pending map,
//! - spawns one task per inbound request,
//! - forwards notifications, in order, to a second task running the
//!   notification handlers.
//!
//! Closing the transport fails every pending call with `ConnectionClosed` and
//! cancels every in-flight handler.

use std::collections::HashMap;
use std::collections::hash_map::Entry as HashEntry;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mcplink_protocol::jsonrpc::recover_id;
use mcplink_protocol::types::with_progress_token;
use mcplink_protocol::{
    CancelledNotification, DEFAULT_REQUEST_TIMEOUT_MS, ErrorKind, JsonRpcError,
    JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpError, McpResult, MessageKind, ProgressNotification, RequestId, Role, classify, methods,
};
use mcplink_transport_traits::{AuthInfo, SendOptions, Transport, TransportError, TransportHandler};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::context::RequestContext;
use crate::handler::{NotificationHandler, RequestHandler};
use crate::options::RequestOptions;
use crate::session::{Session, SessionState};

const CANCELLED_BY_CALLER: &str = "Request cancelled by caller";

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout for outbound requests that do not set their own
    pub request_timeout: Duration,
    /// First id handed out; a rebuilt engine continues where the old one stopped
    pub first_request_id: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            first_request_id: 0,
        }
    }
}

struct PendingCall {
    method: String,
    created_at: Instant,
    reply: oneshot::Sender<McpResult<Value>>,
    progress: Option<mpsc::UnboundedSender<ProgressNotification>>,
}

#[derive(Default)]
struct Handlers {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    fallback_request: Option<Arc<dyn RequestHandler>>,
    fallback_notification: Option<Arc<dyn NotificationHandler>>,
}

type CloseObserver = Arc<dyn Fn() + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&McpError) + Send + Sync>;

#[derive(Default)]
struct Observers {
    on_close: Option<CloseObserver>,
    on_error: Option<ErrorObserver>,
}

enum Inbound {
    Message(Value, Option<AuthInfo>),
    Error(TransportError),
    Closed,
}

/// Transport callbacks land here and are queued for the dispatcher.
struct EngineSink {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl TransportHandler for EngineSink {
    fn on_message(&self, message: Value, auth: Option<AuthInfo>) {
        let _ = self.tx.send(Inbound::Message(message, auth));
    }

    fn on_error(&self, error: TransportError) {
        let _ = self.tx.send(Inbound::Error(error));
    }

    fn on_close(&self) {
        let _ = self.tx.send(Inbound::Closed);
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    config: EngineConfig,
    next_id: AtomicI64,
    closed: AtomicBool,
    pending: DashMap<RequestId, PendingCall>,
    in_flight: DashMap<RequestId, CancellationToken>,
    handlers: RwLock<Handlers>,
    observers: RwLock<Observers>,
    shutdown: CancellationToken,
}

/// Correlates requests with replies and dispatches inbound traffic for one
/// connection. Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ProtocolEngine {
    shared: Arc<Shared>,
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("role", &self.shared.session.role())
            .field("state", &self.shared.session.state())
            .field("transport", &self.shared.transport.transport_type())
            .field("pending", &self.shared.pending.len())
            .field("in_flight", &self.shared.in_flight.len())
            .finish()
    }
}

impl ProtocolEngine {
    /// Create an engine with default settings
    pub fn new(transport: Arc<dyn Transport>, session: Arc<Session>) -> Self {
        Self::with_config(transport, session, EngineConfig::default())
    }

    /// Create an engine with explicit settings
    pub fn with_config(
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
        config: EngineConfig,
    ) -> Self {
        let next_id = AtomicI64::new(config.first_request_id);
        Self {
            shared: Arc::new(Shared {
                transport,
                session,
                config,
                next_id,
                closed: AtomicBool::new(false),
                pending: DashMap::new(),
                in_flight: DashMap::new(),
                handlers: RwLock::new(Handlers::default()),
                observers: RwLock::new(Observers::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The session this engine drives
    pub fn session(&self) -> &Arc<Session> {
        &self.shared.session
    }

    /// The underlying transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.session.state()
    }

    /// The id the next outbound request will get
    pub fn next_request_id(&self) -> i64 {
        self.shared.next_id.load(Ordering::SeqCst)
    }

    /// Number of outbound requests awaiting a reply
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Whether the connection has closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub(crate) fn transport_session_id(&self) -> Option<String> {
        self.shared.transport.session_id()
    }

    /// Install the transport callbacks, spawn the dispatcher and start the
    /// transport. Moves the session `Disconnected -> Connecting`.
    pub async fn start(&self) -> McpResult<()> {
        let shared = &self.shared;
        shared
            .session
            .transition(SessionState::Disconnected, SessionState::Connecting)?;

        let (tx, inbound) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        shared.transport.set_handler(Arc::new(EngineSink { tx }));
        tokio::spawn(run_dispatcher(Arc::downgrade(shared), inbound, notify_tx));
        tokio::spawn(run_notifications(Arc::downgrade(shared), notify_rx));

        if let Err(error) = shared.transport.start().await {
            warn!(%error, "transport failed to start");
            let _ = shared.session.force(SessionState::Error);
            return Err(error.into());
        }
        debug!(
            role = %shared.session.role(),
            transport = %shared.transport.transport_type(),
            "protocol engine started"
        );
        Ok(())
    }

    /// Send a request and wait for its reply.
    ///
    /// The capability gate runs before anything is serialized. The pending
    /// slot exists before the write, so a reply can never outrun its waiter.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        let shared = &self.shared;
        shared.session.check_outbound_request(method)?;

        let RequestOptions {
            timeout,
            cancellation,
            on_progress,
            reset_timeout_on_progress,
            max_total_timeout,
            related_request_id,
            request_id,
        } = options;

        let id = request_id
            .unwrap_or_else(|| RequestId::Number(shared.next_id.fetch_add(1, Ordering::SeqCst)));
        let params = match on_progress {
            Some(_) => with_progress_token(params, &id),
            None => params,
        };

        let (reply_tx, mut reply_rx) = oneshot::channel();
        let (progress_tx, mut progress_rx) = match on_progress {
            Some(_) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        match shared.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(McpError::invalid_request(format!(
                    "request id {id} is already outstanding"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    method: method.to_string(),
                    created_at: Instant::now(),
                    reply: reply_tx,
                    progress: progress_tx,
                });
            }
        }
        let _guard = PendingGuard {
            pending: &shared.pending,
            id: &id,
        };
        if shared.shutdown.is_cancelled() {
            return Err(McpError::connection_closed("connection closed"));
        }

        let timeout = timeout.unwrap_or(shared.config.request_timeout);
        let started = Instant::now();
        let mut deadline = started + timeout;
        let hard_deadline = max_total_timeout.map(|max| started + max);
        let cancellation = cancellation.unwrap_or_default();

        trace!(%id, method, "sending request");
        let request = JsonRpcMessage::from(JsonRpcRequest::new(id.clone(), method, params));
        let send_options = SendOptions { related_request_id };

        // The write itself counts against the deadline.
        tokio::select! {
            written = shared.transport.send(request.into(), send_options) => {
                written.map_err(McpError::from)?;
            }
            () = sleep_until(earliest(deadline, hard_deadline)) => {
                return Err(timeout_error(method, hard_deadline, deadline));
            }
            () = cancellation.cancelled() => {
                return Err(McpError::cancelled(CANCELLED_BY_CALLER));
            }
        }

        loop {
            tokio::select! {
                reply = &mut reply_rx => {
                    return reply.unwrap_or_else(|_| {
                        Err(McpError::connection_closed("connection closed"))
                    });
                }
                Some(progress) = next_progress(&mut progress_rx) => {
                    if let Some(callback) = &on_progress {
                        callback(progress);
                    }
                    if reset_timeout_on_progress {
                        deadline = Instant::now() + timeout;
                    }
                }
                () = sleep_until(earliest(deadline, hard_deadline)) => {
                    shared.pending.remove(&id);
                    let error = timeout_error(method, hard_deadline, deadline);
                    debug!(%id, method, %error, "request timed out");
                    self.notify_cancelled(&id, &error.message).await;
                    return Err(error);
                }
                () = cancellation.cancelled() => {
                    shared.pending.remove(&id);
                    debug!(%id, method, "request cancelled by caller");
                    self.notify_cancelled(&id, CANCELLED_BY_CALLER).await;
                    return Err(McpError::cancelled(CANCELLED_BY_CALLER));
                }
            }
        }
    }

    /// Send a notification. Transport failures go to the error observer;
    /// only gating failures are returned.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
        related_request_id: Option<RequestId>,
    ) -> McpResult<()> {
        self.shared.session.check_outbound_notification(method)?;
        trace!(method, "sending notification");
        let message = JsonRpcMessage::from(JsonRpcNotification::new(method, params));
        self.shared
            .send_message(message, SendOptions { related_request_id })
            .await;
        Ok(())
    }

    async fn notify_cancelled(&self, id: &RequestId, reason: &str) {
        let params = CancelledNotification {
            request_id: id.clone(),
            reason: Some(reason.to_string()),
        };
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(error) => {
                warn!(%error, "failed to encode cancellation");
                return;
            }
        };
        if let Err(error) = self
            .send_notification(methods::NOTIFICATION_CANCELLED, Some(params), None)
            .await
        {
            debug!(%id, %error, "cancellation not sent");
        }
    }

    /// Register the handler for request `method`.
    ///
    /// Fails with `CapabilityNotSupported` when the local side does not
    /// advertise what the method needs, and with `HandlerAlreadyRegistered`
    /// when the method is taken.
    pub fn set_request_handler(
        &self,
        method: impl Into<String>,
        handler: impl RequestHandler,
    ) -> McpResult<()> {
        let method = method.into();
        self.shared.session.check_handler_registration(&method)?;
        match self.shared.handlers.write().requests.entry(method) {
            HashEntry::Occupied(entry) => Err(McpError::handler_already_registered(entry.key())),
            HashEntry::Vacant(entry) => {
                entry.insert(Arc::new(handler));
                Ok(())
            }
        }
    }

    /// Remove the handler for request `method`; returns whether one existed
    pub fn remove_request_handler(&self, method: &str) -> bool {
        self.shared.handlers.write().requests.remove(method).is_some()
    }

    /// Register the handler for notification `method`
    pub fn set_notification_handler(
        &self,
        method: impl Into<String>,
        handler: impl NotificationHandler,
    ) -> McpResult<()> {
        match self.shared.handlers.write().notifications.entry(method.into()) {
            HashEntry::Occupied(entry) => Err(McpError::handler_already_registered(entry.key())),
            HashEntry::Vacant(entry) => {
                entry.insert(Arc::new(handler));
                Ok(())
            }
        }
    }

    /// Remove the handler for notification `method`; returns whether one existed
    pub fn remove_notification_handler(&self, method: &str) -> bool {
        self.shared
            .handlers
            .write()
            .notifications
            .remove(method)
            .is_some()
    }

    /// Handle every request no specific handler claims
    pub fn set_fallback_request_handler(&self, handler: impl RequestHandler) -> McpResult<()> {
        let mut handlers = self.shared.handlers.write();
        if handlers.fallback_request.is_some() {
            return Err(McpError::handler_already_registered("fallback request handler"));
        }
        handlers.fallback_request = Some(Arc::new(handler));
        Ok(())
    }

    /// Handle every notification no specific handler claims
    pub fn set_fallback_notification_handler(
        &self,
        handler: impl NotificationHandler,
    ) -> McpResult<()> {
        let mut handlers = self.shared.handlers.write();
        if handlers.fallback_notification.is_some() {
            return Err(McpError::handler_already_registered(
                "fallback notification handler",
            ));
        }
        handlers.fallback_notification = Some(Arc::new(handler));
        Ok(())
    }

    /// Run `observer` once when the connection closes
    pub fn on_close(&self, observer: impl Fn() + Send + Sync + 'static) {
        self.shared.observers.write().on_close = Some(Arc::new(observer));
    }

    /// Run `observer` for transport and protocol errors nobody awaits
    pub fn on_error(&self, observer: impl Fn(&McpError) + Send + Sync + 'static) {
        self.shared.observers.write().on_error = Some(Arc::new(observer));
    }

    /// Close the transport. A second call is a no-op.
    pub async fn close(&self) -> McpResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let result = self.shared.transport.close().await;
        self.shared.handle_closed();
        result.map_err(McpError::from)
    }

    /// Graceful shutdown: enter `ShuttingDown`, fail pending calls with
    /// "connection closing", then close the transport.
    pub async fn shutdown(&self) -> McpResult<()> {
        if !self.shared.session.begin_shutdown() {
            return Ok(());
        }
        info!(role = %self.shared.session.role(), "shutting down session");
        self.shared.fail_pending("connection closing");
        self.close().await
    }

    /// Resolves once the connection has closed
    pub async fn wait_closed(&self) {
        self.shared.shutdown.cancelled().await;
    }
}

/// Drops the pending entry however `send_request` exits, including when the
/// caller abandons the future.
struct PendingGuard<'a> {
    pending: &'a DashMap<RequestId, PendingCall>,
    id: &'a RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

fn earliest(deadline: Instant, hard_deadline: Option<Instant>) -> Instant {
    hard_deadline.map_or(deadline, |hard| hard.min(deadline))
}

fn timeout_error(method: &str, hard_deadline: Option<Instant>, deadline: Instant) -> McpError {
    if hard_deadline.is_some_and(|hard| hard <= deadline) {
        McpError::new(ErrorKind::RequestTimeout, "Maximum total timeout exceeded")
    } else {
        McpError::request_timeout(method)
    }
}

async fn next_progress(
    rx: &mut Option<mpsc::UnboundedReceiver<ProgressNotification>>,
) -> Option<ProgressNotification> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Shared {
    fn report_error(&self, error: McpError) {
        let observer = self.observers.read().on_error.clone();
        match observer {
            Some(observer) => observer(&error),
            None => debug!(%error, "unobserved engine error"),
        }
    }

    async fn send_message(&self, message: JsonRpcMessage, options: SendOptions) {
        if let Err(error) = self.transport.send(message.into(), options).await {
            warn!(%error, "failed to send message");
            self.report_error(error.into());
        }
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                debug!(
                    %id,
                    method = %call.method,
                    waited_ms = call.created_at.elapsed().as_millis() as u64,
                    reason,
                    "failing pending request"
                );
                let _ = call.reply.send(Err(McpError::connection_closed(reason)));
            }
        }
    }

    fn handle_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // In-flight handler tokens are children of this one.
        self.shutdown.cancel();
        self.fail_pending("connection closed");
        let state = self.session.on_transport_closed();
        debug!(role = %self.session.role(), %state, "connection closed");

        let observer = self.observers.read().on_close.clone();
        if let Some(observer) = observer {
            observer();
        }
    }

    fn resolve(&self, id: RequestId, outcome: McpResult<Value>) {
        match self.pending.remove(&id) {
            Some((_, call)) => {
                trace!(%id, method = %call.method, "resolving pending request");
                let _ = call.reply.send(outcome);
            }
            None => warn!(%id, "Received response for unknown or expired request ID"),
        }
    }

    fn dispatch_document(
        self: &Arc<Self>,
        document: Value,
        auth: Option<&AuthInfo>,
        notifications: &mpsc::UnboundedSender<JsonRpcNotification>,
    ) {
        match document {
            Value::Array(items) if items.is_empty() => {
                warn!("received empty batch");
                let reply = JsonRpcErrorResponse::without_id(JsonRpcError::invalid_request(
                    "empty batch",
                ));
                self.spawn_send(reply.into(), SendOptions::default());
            }
            Value::Array(items) => {
                for item in items {
                    self.dispatch_one(item, auth, notifications);
                }
            }
            single => self.dispatch_one(single, auth, notifications),
        }
    }

    fn dispatch_one(
        self: &Arc<Self>,
        document: Value,
        auth: Option<&AuthInfo>,
        notifications: &mpsc::UnboundedSender<JsonRpcNotification>,
    ) {
        let kind = classify(&document);
        let id_hint = recover_id(&document);
        let message = match JsonRpcMessage::from_value(document) {
            Ok(message) => message,
            Err(error) => {
                match (kind, id_hint) {
                    (MessageKind::Response | MessageKind::ErrorMessage, Some(id)) => {
                        warn!(%id, %error, "malformed reply");
                        self.resolve(id, Err(error));
                    }
                    (_, Some(id)) => {
                        debug!(%id, %error, "rejecting invalid message");
                        self.spawn_reply(id, Err(McpError::invalid_request(error.message)));
                    }
                    (_, None) => warn!(%error, "dropping invalid message without id"),
                }
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => self.resolve(response.id, Ok(response.result)),
            JsonRpcMessage::Error(reply) => {
                let remote = McpError::from_jsonrpc_error(reply.error);
                match reply.id {
                    Some(id) => self.resolve(id, Err(remote)),
                    None => {
                        warn!(error = %remote, "peer reported an error without id");
                        self.report_error(remote);
                    }
                }
            }
            JsonRpcMessage::Request(request) => self.dispatch_request(request, auth.cloned()),
            JsonRpcMessage::Notification(notification) => {
                self.route_notification(notification, notifications);
            }
        }
    }

    fn route_notification(
        &self,
        notification: JsonRpcNotification,
        queue: &mpsc::UnboundedSender<JsonRpcNotification>,
    ) {
        if let Err(error) = self.session.check_inbound_notification(&notification.method) {
            warn!(method = %notification.method, %error, "dropping notification");
            return;
        }
        match notification.method.as_str() {
            methods::NOTIFICATION_CANCELLED => {
                if self.cancel_in_flight(notification.params.as_ref()) {
                    return;
                }
            }
            methods::NOTIFICATION_PROGRESS => {
                if self.route_progress(notification.params.as_ref()) {
                    return;
                }
            }
            // Flip the gate here, not on the handler queue, so a request
            // right behind the notification already sees it.
            methods::NOTIFICATION_INITIALIZED if self.session.role() == Role::Server => {
                if let Err(error) = self
                    .session
                    .transition(SessionState::Initializing, SessionState::Initialized)
                {
                    warn!(%error, "unexpected initialized notification");
                }
            }
            _ => {}
        }
        if queue.send(notification).is_err() {
            trace!("notification queue closed");
        }
    }

    fn cancel_in_flight(&self, params: Option<&Value>) -> bool {
        let Some(cancelled) = params
            .cloned()
            .and_then(|p| serde_json::from_value::<CancelledNotification>(p).ok())
        else {
            return false;
        };
        match self.in_flight.get(&cancelled.request_id) {
            Some(token) => {
                debug!(
                    id = %cancelled.request_id,
                    reason = cancelled.reason.as_deref().unwrap_or(""),
                    "peer cancelled request"
                );
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn route_progress(&self, params: Option<&Value>) -> bool {
        let Some(progress) = params
            .cloned()
            .and_then(|p| serde_json::from_value::<ProgressNotification>(p).ok())
        else {
            return false;
        };
        let Some(call) = self.pending.get(&progress.progress_token) else {
            return false;
        };
        match &call.progress {
            Some(tx) => tx.send(progress).is_ok(),
            None => false,
        }
    }

    fn dispatch_request(self: &Arc<Self>, request: JsonRpcRequest, auth: Option<AuthInfo>) {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        if let Err(error) = self.session.check_inbound_request(&method) {
            debug!(%id, %method, %error, "rejecting request");
            self.spawn_reply(id, Err(error));
            return;
        }

        let registered = self.handlers.read().requests.get(&method).cloned();
        let handler = match registered {
            Some(handler) => handler,
            None if method == methods::PING => {
                self.spawn_reply(id, Ok(json!({})));
                return;
            }
            None => {
                let fallback = self.handlers.read().fallback_request.clone();
                match fallback {
                    Some(handler) => handler,
                    None => {
                        debug!(%id, %method, "no handler for request");
                        self.spawn_reply(id, Err(McpError::method_not_found(method)));
                        return;
                    }
                }
            }
        };

        let token = self.shutdown.child_token();
        self.in_flight.insert(id.clone(), token.clone());
        let ctx = RequestContext::new(
            id.clone(),
            method.clone(),
            params.as_ref(),
            auth,
            token.clone(),
            ProtocolEngine {
                shared: Arc::clone(self),
            },
        );

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            trace!(%id, %method, "dispatching request");
            let task = tokio::spawn(async move { handler.handle(params, ctx).await });
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(join) if join.is_panic() => {
                    error!(%id, %method, "request handler panicked");
                    Err(McpError::internal("request handler panicked"))
                }
                Err(_) => Err(McpError::internal("request handler aborted")),
            };
            shared.in_flight.remove(&id);
            if token.is_cancelled() {
                debug!(%id, %method, "request cancelled, reply suppressed");
                return;
            }
            shared.send_reply(id, outcome).await;
        });
    }

    async fn send_reply(&self, id: RequestId, outcome: McpResult<Value>) {
        let message = match outcome {
            Ok(result) => JsonRpcMessage::from(JsonRpcResponse::success(id.clone(), result)),
            Err(error) => JsonRpcMessage::from(JsonRpcErrorResponse::new(
                id.clone(),
                error.to_jsonrpc_error(),
            )),
        };
        self.send_message(message, SendOptions::related_to(id)).await;
    }

    fn spawn_reply(self: &Arc<Self>, id: RequestId, outcome: McpResult<Value>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.send_reply(id, outcome).await });
    }

    fn spawn_send(self: &Arc<Self>, message: JsonRpcMessage, options: SendOptions) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.send_message(message, options).await });
    }
}

async fn run_dispatcher(
    engine: Weak<Shared>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    notifications: mpsc::UnboundedSender<JsonRpcNotification>,
) {
    while let Some(event) = inbound.recv().await {
        let Some(shared) = engine.upgrade() else {
            break;
        };
        match event {
            Inbound::Message(document, auth) => {
                shared.dispatch_document(document, auth.as_ref(), &notifications);
            }
            Inbound::Error(error) => {
                warn!(%error, "transport error");
                shared.report_error(error.into());
            }
            Inbound::Closed => {
                shared.handle_closed();
                break;
            }
        }
    }
    trace!("dispatcher stopped");
}

async fn run_notifications(
    engine: Weak<Shared>,
    mut queue: mpsc::UnboundedReceiver<JsonRpcNotification>,
) {
    while let Some(notification) = queue.recv().await {
        let handler = {
            let Some(shared) = engine.upgrade() else {
                break;
            };
            let handlers = shared.handlers.read();
            handlers
                .notifications
                .get(&notification.method)
                .cloned()
                .or_else(|| handlers.fallback_notification.clone())
        };
        match handler {
            Some(handler) => {
                let method = notification.method;
                let params = notification.params;
                // Own task so a panicking handler does not take the queue down
                let task = tokio::spawn(async move { handler.handle(params).await });
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => warn!(%method, %error, "notification handler failed"),
                    Err(join) if join.is_panic() => {
                        error!(%method, "notification handler panicked");
                    }
                    Err(_) => warn!(%method, "notification handler aborted"),
                }
            }
            None => trace!(method = %notification.method, "no handler for notification"),
        }
    }
}
