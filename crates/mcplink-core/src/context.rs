//! Per-request context handed to request handlers.

use std::fmt;

use mcplink_protocol::types::progress_token;
use mcplink_protocol::{McpResult, ProgressNotification, RequestId, methods};
use mcplink_transport_traits::AuthInfo;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::engine::ProtocolEngine;
use crate::options::RequestOptions;

/// What a handler knows about the request it is answering.
///
/// Messages sent through the context are tied to this request, so a
/// Streamable HTTP server delivers them on the request's own SSE stream.
#[derive(Clone)]
pub struct RequestContext {
    request_id: RequestId,
    method: String,
    progress_token: Option<RequestId>,
    session_id: Option<String>,
    auth: Option<AuthInfo>,
    cancellation: CancellationToken,
    engine: ProtocolEngine,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("session_id", &self.session_id)
            .field("authenticated", &self.auth.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl RequestContext {
    pub(crate) fn new(
        request_id: RequestId,
        method: String,
        params: Option<&Value>,
        auth: Option<AuthInfo>,
        cancellation: CancellationToken,
        engine: ProtocolEngine,
    ) -> Self {
        Self {
            request_id,
            method,
            progress_token: progress_token(params),
            session_id: engine.transport_session_id(),
            auth,
            cancellation,
            engine,
        }
    }

    /// Id of the request being answered
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Method being answered
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Transport session id, when the transport carries one
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Verified credentials that came with the request
    pub fn auth(&self) -> Option<&AuthInfo> {
        self.auth.as_ref()
    }

    /// Progress token the caller asked for, if any
    pub fn progress_token(&self) -> Option<&RequestId> {
        self.progress_token.as_ref()
    }

    /// Cancelled when the peer sends `notifications/cancelled` for this
    /// request or the connection closes. The reply is then suppressed.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shorthand for `cancellation_token().is_cancelled()`
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Send a notification related to this request
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.engine
            .send_notification(method, params, Some(self.request_id.clone()))
            .await
    }

    /// Send a request to the peer related to this request
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        let options = options.related_to(self.request_id.clone());
        self.engine.send_request(method, params, options).await
    }

    /// Report progress; a no-op when the caller did not ask for it
    pub async fn report_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> McpResult<()> {
        let Some(token) = self.progress_token.clone() else {
            return Ok(());
        };
        let notification = ProgressNotification {
            progress_token: token,
            progress,
            total,
            message,
        };
        let params = serde_json::to_value(notification)?;
        self.send_notification(methods::NOTIFICATION_PROGRESS, Some(params))
            .await
    }
}
