//! Streamable HTTP client transport.
//!
//! Every outbound message is one `POST` to the MCP endpoint. The reply is
//! either empty (202), a JSON body, or an SSE stream that is drained on its own
//! task. Once the server assigns a session id, a standalone `GET` stream is
//! opened for server-initiated traffic and kept alive with the configured
//! [`RetryPolicy`](crate::RetryPolicy).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use mcplink_protocol::JsonRpcPayload;
use mcplink_transport_traits::{
    HandlerSlot, SendOptions, Transport, TransportCapabilities, TransportError, TransportFuture,
    TransportHandler, TransportResult, TransportState, TransportType, validate_request_size,
    validate_response_size,
};
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::StreamableHttpClientConfig;
use crate::sse::SseParser;
use crate::{LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER};

const ACCEPT_POST: &str = "application/json, text/event-stream";
const ACCEPT_SSE: &str = "text/event-stream";

struct Inner {
    config: StreamableHttpClientConfig,
    endpoint: String,
    http: reqwest::Client,
    slot: HandlerSlot,
    state: Mutex<TransportState>,
    running: AtomicBool,
    session_id: RwLock<Option<String>>,
    last_event_id: RwLock<Option<String>>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    body_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Client side of the streamable HTTP transport
pub struct StreamableHttpClientTransport {
    inner: Arc<Inner>,
    capabilities: TransportCapabilities,
}

impl fmt::Debug for StreamableHttpClientTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpClientTransport")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &*self.inner.state.lock())
            .field("session_id", &*self.inner.session_id.read())
            .finish()
    }
}

impl StreamableHttpClientTransport {
    /// Create a transport for the configured endpoint
    pub fn new(config: StreamableHttpClientConfig) -> TransportResult<Self> {
        url::Url::parse(&config.endpoint_url()).map_err(|e| {
            TransportError::ConfigurationError(format!(
                "invalid endpoint URL {}: {e}",
                config.endpoint_url()
            ))
        })?;

        let mut builder = reqwest::Client::builder().connect_timeout(config.timeouts.connect);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::ConfigurationError(e.to_string()))?;

        let capabilities = TransportCapabilities {
            max_message_size: config.limits.max_request_size,
            supports_streaming: true,
            supports_resumability: true,
            supports_session_id: true,
            supports_bidirectional: true,
            ..TransportCapabilities::default()
        };

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint: config.endpoint_url(),
                config,
                http,
                slot: HandlerSlot::new(),
                state: Mutex::new(TransportState::Disconnected),
                running: AtomicBool::new(false),
                session_id: RwLock::new(None),
                last_event_id: RwLock::new(None),
                stream_task: Mutex::new(None),
                body_tasks: Mutex::new(Vec::new()),
            }),
            capabilities,
        })
    }

    /// Shorthand for a transport with default settings against `base_url`
    pub fn connect_to(base_url: impl Into<String>) -> TransportResult<Self> {
        Self::new(StreamableHttpClientConfig::new(base_url))
    }

}

impl Inner {
    fn headers(&self, accept: &str, last_event_id: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(accept) {
            headers.insert(header::ACCEPT, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.config.protocol_version) {
            headers.insert(PROTOCOL_VERSION_HEADER, value);
        }
        if let Some(session_id) = self.session_id.read().as_deref()
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            headers.insert(SESSION_ID_HEADER, value);
        }
        if let Some(last) = last_event_id
            && let Ok(value) = HeaderValue::from_str(last)
        {
            headers.insert(LAST_EVENT_ID_HEADER, value);
        }
        if let Some(token) = &self.config.auth_token
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(header::AUTHORIZATION, value);
        }
        for (key, value) in &self.config.headers {
            if let (Ok(k), Ok(v)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(k, v);
            }
        }
        headers
    }

    fn capture_session(self: &Arc<Self>, headers: &HeaderMap) {
        let Some(sid) = headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };

        let first = {
            let mut current = self.session_id.write();
            if current.as_deref() == Some(sid) {
                return;
            }
            let first = current.is_none();
            *current = Some(sid.to_string());
            first
        };
        info!(session_id = sid, "received session id");
        if first && self.running.load(Ordering::Acquire) {
            self.open_stream(None);
        }
    }

    fn expire_session(&self) {
        if let Some(sid) = self.session_id.write().take() {
            warn!(session_id = %sid, "session expired");
        }
        *self.last_event_id.write() = None;
        if let Some(task) = self.stream_task.lock().take() {
            task.abort();
        }
    }

    fn open_stream(self: &Arc<Self>, last_event_id: Option<String>) {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run_stream(last_event_id).await });
        if let Some(previous) = self.stream_task.lock().replace(task) {
            previous.abort();
        }
    }

    async fn run_stream(self: Arc<Self>, mut last_event_id: Option<String>) {
        let mut attempt = 0u32;
        loop {
            if !self.running.load(Ordering::Acquire) || self.session_id.read().is_none() {
                return;
            }

            let headers = self.headers(ACCEPT_SSE, last_event_id.as_deref());
            match self.http.get(&self.endpoint).headers(headers).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::METHOD_NOT_ALLOWED {
                        debug!("server offers no standalone SSE stream");
                        return;
                    }
                    if status == StatusCode::NOT_FOUND {
                        self.slot.error(TransportError::SessionExpired(
                            "standalone stream rejected with 404".to_string(),
                        ));
                        self.expire_session();
                        return;
                    }
                    if status.is_success() {
                        debug!("standalone SSE stream open");
                        attempt = 0;
                        if let Err(error) = self.consume_sse(response, true).await {
                            warn!(%error, "standalone SSE stream failed");
                        }
                        debug!("standalone SSE stream ended");
                    } else {
                        warn!(%status, "standalone SSE stream rejected");
                    }
                }
                Err(error) => warn!(%error, "failed to open standalone SSE stream"),
            }

            if !self.running.load(Ordering::Acquire) {
                return;
            }
            last_event_id = self.last_event_id.read().clone();
            let Some(delay) = self.config.retry_policy.delay(attempt) else {
                self.slot.error(TransportError::ConnectionLost(
                    "standalone SSE stream retries exhausted".to_string(),
                ));
                return;
            };
            attempt += 1;
            debug!(attempt, ?delay, "reconnecting standalone SSE stream");
            tokio::time::sleep(delay).await;
        }
    }

    /// Drain an SSE body, delivering each `message` event. `track` records
    /// event ids as the resume point of the standalone stream.
    async fn consume_sse(&self, response: reqwest::Response, track: bool) -> TransportResult<()> {
        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            for event in parser.feed(&chunk) {
                if track && let Some(id) = &event.id {
                    *self.last_event_id.write() = Some(id.clone());
                }
                if !event.is_message() || event.data.trim().is_empty() {
                    trace!(event = ?event.event, "skipping SSE event");
                    continue;
                }
                self.deliver(event.data.as_bytes());
            }
        }
        Ok(())
    }

    fn deliver(&self, bytes: &[u8]) {
        if let Err(error) = validate_response_size(bytes.len(), &self.config.limits) {
            self.slot.error(error);
            return;
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => self.slot.message(value, None),
            Err(e) => self.slot.error(TransportError::SerializationFailed(format!(
                "invalid JSON from server: {e}"
            ))),
        }
    }

    fn track_body_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.body_tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    async fn post(self: &Arc<Self>, body: Vec<u8>) -> TransportResult<()> {
        let had_session = self.session_id.read().is_some();
        let request = self
            .http
            .post(&self.endpoint)
            .headers(self.headers(ACCEPT_POST, None))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send();

        let response = match self.config.timeouts.request {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => request.await,
        }
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.capture_session(response.headers());
        let status = response.status();

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND && had_session {
            self.expire_session();
            return Err(TransportError::SessionExpired(
                "server no longer knows this session; re-initialize".to_string(),
            ));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::SendFailed(format!("HTTP {status}: {text}")));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            let inner = Arc::clone(self);
            let task = tokio::spawn(async move {
                if let Err(error) = inner.consume_sse(response, false).await {
                    inner.slot.error(error);
                }
            });
            self.track_body_task(task);
        } else if content_type.starts_with("application/json") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            if !bytes.is_empty() {
                self.deliver(&bytes);
            }
        } else if !content_type.is_empty() {
            return Err(TransportError::ProtocolError(format!(
                "unexpected content type: {content_type}"
            )));
        }
        Ok(())
    }

    async fn terminate_session(&self, session_id: String) {
        let mut headers = self.headers(ACCEPT_POST, None);
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            headers.insert(SESSION_ID_HEADER, value);
        }
        let request = self.http.delete(&self.endpoint).headers(headers).send();
        let result = match self.config.timeouts.request {
            Some(limit) => tokio::time::timeout(limit, request).await.ok(),
            None => Some(request.await),
        };
        match result {
            Some(Ok(response)) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                debug!("server does not support session termination");
            }
            Some(Ok(response)) if response.status().is_success() => {
                debug!(%session_id, "session terminated");
            }
            Some(Ok(response)) => warn!(status = %response.status(), "DELETE rejected"),
            Some(Err(error)) => warn!(%error, "failed to terminate session"),
            None => warn!("DELETE timed out"),
        }
    }
}

impl Transport for StreamableHttpClientTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    fn state(&self) -> TransportState {
        self.inner.state.lock().clone()
    }

    fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        self.inner.slot.set(handler);
    }

    fn start(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.inner.running.swap(true, Ordering::AcqRel) {
                return Err(TransportError::AlreadyStarted);
            }
            self.inner.slot.rearm();
            *self.inner.state.lock() = TransportState::Connected;
            info!(endpoint = %self.inner.endpoint, "streamable HTTP client started");

            // A restart with a live session picks the standalone stream back up
            if self.inner.session_id.read().is_some() {
                let last = self.inner.last_event_id.read().clone();
                self.inner.open_stream(last);
            }
            Ok(())
        })
    }

    fn send(&self, payload: JsonRpcPayload, _options: SendOptions) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.inner.running.load(Ordering::Acquire) || self.inner.slot.is_closed() {
                return Err(TransportError::NotConnected);
            }
            let body = serde_json::to_vec(&payload)?;
            validate_request_size(body.len(), &self.inner.config.limits)?;
            self.inner.post(body).await
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.inner.running.swap(false, Ordering::AcqRel) {
                return Ok(());
            }
            *self.inner.state.lock() = TransportState::Disconnecting;

            if let Some(task) = self.inner.stream_task.lock().take() {
                task.abort();
            }
            for task in self.inner.body_tasks.lock().drain(..) {
                task.abort();
            }

            // A detached session (id cleared before close) keeps its resume
            // point so the next run can replay what it missed.
            let session = self.inner.session_id.write().take();
            if let Some(session_id) = session {
                self.inner.terminate_session(session_id).await;
                *self.inner.last_event_id.write() = None;
            }

            *self.inner.state.lock() = TransportState::Disconnected;
            self.inner.slot.close();
            info!("streamable HTTP client closed");
            Ok(())
        })
    }

    fn session_id(&self) -> Option<String> {
        self.inner.session_id.read().clone()
    }

    fn set_session_id(&self, session_id: Option<String>) {
        *self.inner.session_id.write() = session_id;
    }

    fn resume(&self, last_event_id: String) -> TransportFuture<'_, bool> {
        Box::pin(async move {
            if self.inner.session_id.read().is_none() {
                return Ok(false);
            }
            *self.inner.last_event_id.write() = Some(last_event_id.clone());
            if self.inner.running.load(Ordering::Acquire) {
                self.inner.open_stream(Some(last_event_id));
            }
            Ok(true)
        })
    }

    fn last_event_id(&self) -> Option<String> {
        self.inner.last_event_id.read().clone()
    }
}

impl Drop for StreamableHttpClientTransport {
    fn drop(&mut self) {
        if let Some(task) = self.inner.stream_task.lock().take() {
            task.abort();
        }
        for task in self.inner.body_tasks.lock().drain(..) {
            task.abort();
        }
    }
}
