//! Streamable HTTP server transport.
//!
//! One transport serves one MCP session on a single endpoint:
//! - `POST` carries client messages. Requests are answered on an SSE stream
//!   (or one JSON body) that stays open until every response of that POST is
//!   written.
//! - `GET` opens the standalone stream for server-initiated messages.
//! - `DELETE` ends the session.
//!
//! Outbound messages are routed by [`SendOptions::related_request_id`]: a
//! message tied to an open request goes to that request's stream, everything
//! else to the standalone stream.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use mcplink_protocol::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcPayload, MessageKind, RequestId, classify,
    jsonrpc::recover_id, methods,
};
use mcplink_transport_traits::{
    AuthInfo, HandlerSlot, SendOptions, Transport, TransportCapabilities, TransportError,
    TransportFuture, TransportHandler, TransportResult, TransportState, TransportType,
    validate_response_size,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::auth::bearer_token;
use crate::config::StreamableHttpServerConfig;
use crate::sse::SseEvent;
use crate::{LAST_EVENT_ID_HEADER, SESSION_ID_HEADER};

/// Event-store stream id of the standalone GET stream
const STANDALONE_STREAM: &str = "standalone";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

enum Sink {
    Sse(mpsc::UnboundedSender<SseEvent>),
    Json {
        collected: Vec<Value>,
        done: Option<oneshot::Sender<Vec<Value>>>,
    },
    Finished,
}

/// The response channel of one POST that carried requests
struct Exchange {
    stream_id: String,
    pending: HashSet<RequestId>,
    sink: Sink,
}

struct Standalone {
    tx: mpsc::UnboundedSender<SseEvent>,
}

struct Shared {
    config: StreamableHttpServerConfig,
    slot: HandlerSlot,
    state: Mutex<TransportState>,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    session_id: RwLock<Option<String>>,
    standalone: Mutex<Option<Standalone>>,
    /// Held by standalone writes and by a `GET` from replay until install
    standalone_gate: tokio::sync::Mutex<()>,
    exchanges: Mutex<HashMap<RequestId, Arc<Mutex<Exchange>>>>,
}

/// Server side of the streamable HTTP transport
pub struct StreamableHttpServerTransport {
    shared: Arc<Shared>,
    capabilities: TransportCapabilities,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl fmt::Debug for StreamableHttpServerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpServerTransport")
            .field("config", &self.shared.config)
            .field("state", &*self.shared.state.lock())
            .field("session_id", &*self.shared.session_id.read())
            .field("local_addr", &*self.local_addr.lock())
            .finish()
    }
}

impl StreamableHttpServerTransport {
    /// Create a server transport; nothing is bound until `start`
    pub fn new(config: StreamableHttpServerConfig) -> Self {
        let capabilities = TransportCapabilities {
            max_message_size: config.limits.max_response_size,
            supports_streaming: true,
            supports_resumability: config.event_store.is_some(),
            supports_session_id: true,
            supports_bidirectional: true,
            ..TransportCapabilities::default()
        };
        Self {
            shared: Arc::new(Shared {
                config,
                slot: HandlerSlot::new(),
                state: Mutex::new(TransportState::Disconnected),
                running: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
                session_id: RwLock::new(None),
                standalone: Mutex::new(None),
                standalone_gate: tokio::sync::Mutex::new(()),
                exchanges: Mutex::new(HashMap::new()),
            }),
            capabilities,
            serve_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// The axum router serving the MCP endpoint.
    ///
    /// To mount it inside another application, set `bind_addr` to an empty
    /// string: `start` then only arms the transport without binding.
    pub fn router(&self) -> Router {
        let body_limit = match self.shared.config.limits.max_request_size {
            Some(max) => DefaultBodyLimit::max(max),
            None => DefaultBodyLimit::disable(),
        };
        Router::new()
            .route(
                &self.shared.config.endpoint_path,
                get(handle_get)
                    .post(handle_post)
                    .delete(handle_delete)
                    .fallback(method_not_allowed),
            )
            .layer(body_limit)
            .with_state(Arc::clone(&self.shared))
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

impl Shared {
    fn session_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(sid) = self.session_id.read().as_deref()
            && let Ok(value) = HeaderValue::from_str(sid)
        {
            headers.insert(SESSION_ID_HEADER, value);
        }
        headers
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthInfo>, Response> {
        let Some(verifier) = &self.config.token_verifier else {
            return Ok(None);
        };
        let Some(token) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
        else {
            return Err(unauthorized("missing bearer token"));
        };
        match verifier.verify_access_token(token).await {
            Ok(info) => Ok(Some(info)),
            Err(error) => {
                debug!(%error, "rejected bearer token");
                Err(unauthorized("invalid bearer token"))
            }
        }
    }

    /// Runs before any body parsing. Until a session exists there is nothing to
    /// validate; POST decides whether the body may create one.
    fn validate_session(&self, headers: &HeaderMap) -> Result<(), Response> {
        let Some(expected) = self.session_id.read().clone() else {
            return Ok(());
        };
        match headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) {
            None => Err(error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::new(-32000, "Bad Request: Mcp-Session-Id header is required"),
            )),
            Some(sid) if sid != expected => Err(error_response(
                StatusCode::NOT_FOUND,
                JsonRpcError::new(-32001, "Session not found"),
            )),
            Some(_) => Ok(()),
        }
    }

    fn require_session(&self) -> Result<(), Response> {
        if self.session_id.read().is_some() {
            Ok(())
        } else {
            Err(error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::new(-32000, "Bad Request: Server not initialized"),
            ))
        }
    }

    fn register(&self, ids: &[RequestId], sink: Sink) -> String {
        let stream_id = Uuid::new_v4().simple().to_string();
        let exchange = Arc::new(Mutex::new(Exchange {
            stream_id: stream_id.clone(),
            pending: ids.iter().cloned().collect(),
            sink,
        }));
        let mut exchanges = self.exchanges.lock();
        for id in ids {
            exchanges.insert(id.clone(), Arc::clone(&exchange));
        }
        stream_id
    }

    async fn stamp(&self, stream_id: &str, value: &Value) -> TransportResult<SseEvent> {
        let event = SseEvent::message(value.to_string());
        match &self.config.event_store {
            Some(store) => {
                let id = store.store_event(stream_id, value.clone()).await?;
                Ok(event.with_id(id))
            }
            None => Ok(event),
        }
    }

    async fn write_exchange(
        &self,
        exchange: Arc<Mutex<Exchange>>,
        value: Value,
        answered: &[RequestId],
    ) -> TransportResult<()> {
        let stream_id = exchange.lock().stream_id.clone();
        let event = self.stamp(&stream_id, &value).await?;

        let finished = {
            let mut exchange = exchange.lock();
            match &mut exchange.sink {
                Sink::Sse(tx) => {
                    if tx.send(event).is_err() {
                        debug!(%stream_id, "request stream gone; message kept in store only");
                    }
                }
                Sink::Json { collected, .. } if !answered.is_empty() => collected.push(value),
                Sink::Json { .. } => trace!("dropping notification on a JSON response"),
                Sink::Finished => {}
            }
            for id in answered {
                exchange.pending.remove(id);
            }
            if exchange.pending.is_empty() {
                if let Sink::Json { collected, done } = &mut exchange.sink
                    && let Some(done) = done.take()
                {
                    let _ = done.send(std::mem::take(collected));
                }
                exchange.sink = Sink::Finished;
                true
            } else {
                false
            }
        };

        if !answered.is_empty() {
            let mut exchanges = self.exchanges.lock();
            for id in answered {
                exchanges.remove(id);
            }
        }
        if finished {
            debug!(%stream_id, "request stream complete");
        }
        Ok(())
    }

    async fn write_standalone(&self, value: Value) -> TransportResult<()> {
        let _gate = self.standalone_gate.lock().await;
        let event = self.stamp(STANDALONE_STREAM, &value).await?;
        let standalone = self.standalone.lock();
        match standalone.as_ref() {
            Some(stream) if stream.tx.send(event).is_ok() => {}
            _ => trace!("no standalone stream open; message not delivered live"),
        }
        Ok(())
    }

    /// Tear the session down. Returns `false` when already stopped.
    fn terminate(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        *self.state.lock() = TransportState::Disconnecting;
        self.shutdown.lock().cancel();
        *self.session_id.write() = None;
        *self.standalone.lock() = None;
        self.exchanges.lock().clear();
        *self.state.lock() = TransportState::Disconnected;
        self.slot.close();
        true
    }
}

fn error_response(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcErrorResponse::without_id(error))).into_response()
}

fn unauthorized(message: &str) -> Response {
    let mut response = error_response(
        StatusCode::UNAUTHORIZED,
        JsonRpcError::new(-32000, format!("Unauthorized: {message}")),
    );
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(media_type) || accept.contains("*/*"))
}

fn sse_response(
    shared: &Shared,
    rx: mpsc::UnboundedReceiver<SseEvent>,
    headers: HeaderMap,
) -> Response {
    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            yield Ok::<Event, Infallible>(event.into());
        }
    };
    (
        headers,
        Sse::new(stream).keep_alive(KeepAlive::new().interval(shared.config.keep_alive)),
    )
        .into_response()
}

async fn handle_post(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = match shared.authenticate(&headers).await {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    if let Err(response) = shared.validate_session(&headers) {
        return response;
    }
    if headers.contains_key(header::ACCEPT)
        && !accepts(&headers, "application/json")
        && !accepts(&headers, "text/event-stream")
    {
        return error_response(
            StatusCode::NOT_ACCEPTABLE,
            JsonRpcError::new(
                -32000,
                "Not Acceptable: client must accept application/json or text/event-stream",
            ),
        );
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::parse_error(e.to_string()),
            );
        }
    };

    let (count, initializing, request_ids) = {
        let documents: Vec<&Value> = match &value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let initializing = documents
            .iter()
            .any(|d| d.get("method").and_then(Value::as_str) == Some(methods::INITIALIZE));
        let request_ids: Vec<RequestId> = documents
            .iter()
            .filter(|d| classify(d) == MessageKind::Request)
            .filter_map(|d| recover_id(d))
            .collect();
        (documents.len(), initializing, request_ids)
    };
    if count == 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            JsonRpcError::invalid_request("empty batch"),
        );
    }

    if initializing {
        if count > 1 {
            return error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::invalid_request("Only one initialization request is allowed"),
            );
        }
        let session_id = {
            let mut current = shared.session_id.write();
            if current.is_some() {
                None
            } else {
                let sid = Uuid::new_v4().to_string();
                *current = Some(sid.clone());
                Some(sid)
            }
        };
        let Some(session_id) = session_id else {
            return error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::invalid_request("Server already initialized"),
            );
        };
        info!(%session_id, "session created");
    } else if let Err(response) = shared.require_session() {
        return response;
    }

    let is_batch = value.is_array();
    let response_headers = shared.session_headers();

    if request_ids.is_empty() {
        shared.slot.message(value, auth);
        return (StatusCode::ACCEPTED, response_headers).into_response();
    }

    if shared.config.enable_json_response {
        let (done_tx, done_rx) = oneshot::channel();
        shared.register(
            &request_ids,
            Sink::Json {
                collected: Vec::with_capacity(request_ids.len()),
                done: Some(done_tx),
            },
        );
        shared.slot.message(value, auth);
        return match done_rx.await {
            Ok(mut responses) => {
                let body = if !is_batch && responses.len() == 1 {
                    responses.remove(0)
                } else {
                    Value::Array(responses)
                };
                (StatusCode::OK, response_headers, Json(body)).into_response()
            }
            Err(_) => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                JsonRpcError::new(-32000, "connection closed before the response was ready"),
            ),
        };
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let stream_id = shared.register(&request_ids, Sink::Sse(tx));
    debug!(%stream_id, requests = request_ids.len(), "opened request stream");
    shared.slot.message(value, auth);
    sse_response(&shared, rx, response_headers)
}

async fn handle_get(State(shared): State<Arc<Shared>>, headers: HeaderMap) -> Response {
    if let Err(response) = shared.authenticate(&headers).await {
        return response;
    }
    if let Err(response) = shared
        .require_session()
        .and_then(|()| shared.validate_session(&headers))
    {
        return response;
    }
    if !accepts(&headers, "text/event-stream") {
        return error_response(
            StatusCode::NOT_ACCEPTABLE,
            JsonRpcError::new(-32000, "Not Acceptable: client must accept text/event-stream"),
        );
    }

    let conflict = || {
        error_response(
            StatusCode::CONFLICT,
            JsonRpcError::new(-32000, "Conflict: only one SSE stream is allowed per session"),
        )
    };
    if shared
        .standalone
        .lock()
        .as_ref()
        .is_some_and(|s| !s.tx.is_closed())
    {
        return conflict();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let _gate = shared.standalone_gate.lock().await;

    if let Some(last_event_id) = headers.get(LAST_EVENT_ID_HEADER).and_then(|v| v.to_str().ok()) {
        match &shared.config.event_store {
            Some(store) => {
                let (replay_tx, mut replay_rx) = mpsc::unbounded_channel();
                match store.replay_events_after(last_event_id, replay_tx).await {
                    Ok(stream_id) => {
                        let mut replayed = 0usize;
                        while let Ok(stored) = replay_rx.try_recv() {
                            let event =
                                SseEvent::message(stored.message.to_string()).with_id(stored.id);
                            let _ = tx.send(event);
                            replayed += 1;
                        }
                        debug!(%stream_id, replayed, "replayed events");
                    }
                    Err(error) => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            JsonRpcError::new(-32000, format!("Bad Request: {error}")),
                        );
                    }
                }
            }
            None => debug!("Last-Event-ID ignored: no event store configured"),
        }
    }

    {
        let mut standalone = shared.standalone.lock();
        if standalone.as_ref().is_some_and(|s| !s.tx.is_closed()) {
            return conflict();
        }
        *standalone = Some(Standalone { tx });
    }
    debug!("standalone SSE stream opened");
    sse_response(&shared, rx, shared.session_headers())
}

async fn handle_delete(State(shared): State<Arc<Shared>>, headers: HeaderMap) -> Response {
    if let Err(response) = shared.authenticate(&headers).await {
        return response;
    }
    if !shared.config.allow_delete {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, POST")],
        )
            .into_response();
    }
    if let Err(response) = shared
        .require_session()
        .and_then(|()| shared.validate_session(&headers))
    {
        return response;
    }
    info!("session terminated by client");
    shared.terminate();
    StatusCode::OK.into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "GET, POST, DELETE")],
    )
        .into_response()
}

impl Transport for StreamableHttpServerTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    fn state(&self) -> TransportState {
        self.shared.state.lock().clone()
    }

    fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        self.shared.slot.set(handler);
    }

    fn start(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.shared.running.swap(true, Ordering::AcqRel) {
                return Err(TransportError::AlreadyStarted);
            }
            self.shared.slot.rearm();
            *self.shared.state.lock() = TransportState::Connecting;

            let token = CancellationToken::new();
            *self.shared.shutdown.lock() = token.clone();

            let bind_addr = self.shared.config.bind_addr.clone();
            if !bind_addr.is_empty() {
                let listener = match TcpListener::bind(&bind_addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        self.shared.running.store(false, Ordering::Release);
                        *self.shared.state.lock() = TransportState::Failed {
                            reason: e.to_string(),
                        };
                        return Err(TransportError::ConnectionFailed(format!(
                            "failed to bind {bind_addr}: {e}"
                        )));
                    }
                };
                let addr = listener.local_addr()?;
                *self.local_addr.lock() = Some(addr);

                let app = self.router();
                let task = tokio::spawn(async move {
                    let shutdown = async move { token.cancelled().await };
                    if let Err(e) = axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        error!(error = %e, "HTTP server failed");
                    }
                });
                *self.serve_task.lock() = Some(task);
                info!(
                    %addr,
                    endpoint = %self.shared.config.endpoint_path,
                    "streamable HTTP server listening"
                );
            }

            *self.shared.state.lock() = TransportState::Connected;
            Ok(())
        })
    }

    fn send(&self, payload: JsonRpcPayload, options: SendOptions) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.shared.running.load(Ordering::Acquire) || self.shared.slot.is_closed() {
                return Err(TransportError::NotConnected);
            }

            let answered: Vec<RequestId> = payload
                .messages()
                .filter(|m| matches!(m.kind(), MessageKind::Response | MessageKind::ErrorMessage))
                .filter_map(|m| m.id().cloned())
                .collect();
            let value = serde_json::to_value(&payload)?;
            validate_response_size(value.to_string().len(), &self.shared.config.limits)?;

            let route = answered
                .first()
                .cloned()
                .or(options.related_request_id)
                .and_then(|id| self.shared.exchanges.lock().get(&id).cloned().map(|e| (id, e)));

            match route {
                Some((_, exchange)) => {
                    self.shared
                        .write_exchange(exchange, value, &answered)
                        .await
                }
                None if !answered.is_empty() => {
                    warn!(id = %answered[0], "no open request stream for response");
                    Err(TransportError::SendFailed(format!(
                        "no open stream for request {}",
                        answered[0]
                    )))
                }
                None => self.shared.write_standalone(value).await,
            }
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.shared.terminate() {
                info!("streamable HTTP server closing");
            }
            let task = self.serve_task.lock().take();
            if let Some(mut task) = task {
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                    warn!("graceful shutdown timed out; aborting server task");
                    task.abort();
                }
            }
            Ok(())
        })
    }

    fn session_id(&self) -> Option<String> {
        self.shared.session_id.read().clone()
    }

    fn set_session_id(&self, session_id: Option<String>) {
        *self.shared.session_id.write() = session_id;
    }
}

impl Drop for StreamableHttpServerTransport {
    fn drop(&mut self) {
        self.shared.shutdown.lock().cancel();
        if let Some(task) = self.serve_task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_accept_matching() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        assert!(accepts(&headers, "text/event-stream"));
        assert!(!accepts(&headers, "application/json"));

        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        assert!(accepts(&headers, "application/json"));
        assert!(!accepts(&HeaderMap::new(), "text/event-stream"));
    }

    #[test]
    fn test_capabilities_reflect_event_store() {
        let plain = StreamableHttpServerTransport::new(StreamableHttpServerConfig::default());
        assert!(!plain.capabilities().supports_resumability);

        let store = Arc::new(mcplink_transport_traits::InMemoryEventStore::new());
        let resumable = StreamableHttpServerTransport::new(
            StreamableHttpServerConfig::default().with_event_store(store),
        );
        assert!(resumable.capabilities().supports_resumability);
        assert_eq!(resumable.transport_type(), TransportType::StreamableHttp);
    }

    #[tokio::test]
    async fn test_send_before_start_is_not_connected() {
        let transport = StreamableHttpServerTransport::new(StreamableHttpServerConfig::default());
        let payload: JsonRpcPayload = mcplink_protocol::JsonRpcMessage::from(
            mcplink_protocol::JsonRpcNotification::new("notifications/tools/list_changed", None),
        )
        .into();
        assert_eq!(
            transport.send(payload, SendOptions::default()).await.unwrap_err(),
            TransportError::NotConnected
        );
    }
}
