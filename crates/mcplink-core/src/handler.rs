//! Request and notification handler traits.
//!
//! Both traits are implemented for plain async closures, so most callers never
//! name them:
//!
//! ```rust
//! use mcplink_core::{RequestContext, RequestHandler};
//! use mcplink_protocol::McpResult;
//! use serde_json::{Value, json};
//!
//! fn assert_handler<H: RequestHandler>(_h: H) {}
//!
//! assert_handler(|_params: Option<Value>, _ctx: RequestContext| async move {
//!     McpResult::Ok(json!({"tools": []}))
//! });
//! ```

use std::future::Future;

use async_trait::async_trait;
use mcplink_protocol::McpResult;
use serde_json::Value;

use crate::context::RequestContext;

/// Answers one inbound request.
///
/// The returned error is sent to the peer with its code, message and data
/// unchanged. Each call runs on its own task.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the result for `params`
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<Value>> + Send + 'static,
{
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        (self)(params, ctx).await
    }
}

/// Consumes inbound notifications of one method.
///
/// Notifications are delivered one at a time in arrival order; an error is
/// logged and never reaches the peer.
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    /// Process `params`
    async fn handle(&self, params: Option<Value>) -> McpResult<()>;
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<()>> + Send + 'static,
{
    async fn handle(&self, params: Option<Value>) -> McpResult<()> {
        (self)(params).await
    }
}
