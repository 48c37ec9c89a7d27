//! Per-request options for outbound calls.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mcplink_protocol::{ProgressNotification, RequestId};
use tokio_util::sync::CancellationToken;

/// Callback receiving `notifications/progress` for one outbound request
pub type ProgressCallback = Arc<dyn Fn(ProgressNotification) + Send + Sync>;

/// Options for [`ProtocolEngine::send_request`](crate::ProtocolEngine::send_request)
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Deadline for the reply; the engine default applies when `None`
    pub timeout: Option<Duration>,
    /// Cancels the call and notifies the peer with `notifications/cancelled`
    pub cancellation: Option<CancellationToken>,
    /// Receives progress; setting it adds `_meta.progressToken` to the params
    pub on_progress: Option<ProgressCallback>,
    /// Restart the timeout whenever progress arrives
    pub reset_timeout_on_progress: bool,
    /// Hard ceiling that progress never extends
    pub max_total_timeout: Option<Duration>,
    /// Inbound request this call is made on behalf of
    pub related_request_id: Option<RequestId>,
    /// Use this id instead of allocating one. Must not collide with an
    /// outstanding request.
    pub request_id: Option<RequestId>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("cancellation", &self.cancellation.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("reset_timeout_on_progress", &self.reset_timeout_on_progress)
            .field("max_total_timeout", &self.max_total_timeout)
            .field("related_request_id", &self.related_request_id)
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl RequestOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reply deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Receive progress notifications for this call
    #[must_use]
    pub fn with_progress(
        mut self,
        callback: impl Fn(ProgressNotification) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Restart the timeout on each progress notification
    #[must_use]
    pub fn reset_timeout_on_progress(mut self, reset: bool) -> Self {
        self.reset_timeout_on_progress = reset;
        self
    }

    /// Cap the total time regardless of progress
    #[must_use]
    pub fn with_max_total_timeout(mut self, max: Duration) -> Self {
        self.max_total_timeout = Some(max);
        self
    }

    /// Send on behalf of an inbound request
    #[must_use]
    pub fn related_to(mut self, id: RequestId) -> Self {
        self.related_request_id = Some(id);
        self
    }

    /// Use an explicit request id
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<RequestId>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}
