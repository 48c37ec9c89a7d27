//! Core transport trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mcplink_protocol::JsonRpcPayload;

use crate::error::TransportResult;
use crate::handler::TransportHandler;
use crate::types::{SendOptions, TransportCapabilities, TransportState, TransportType};

/// Boxed future returned by [`Transport`] operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// The contract every mcplink transport implements.
///
/// Inbound traffic is pushed into the [`TransportHandler`] installed with
/// [`set_handler`](Transport::set_handler); outbound traffic goes through
/// [`send`](Transport::send). A transport never interprets messages beyond
/// framing.
///
/// Lifecycle rules:
/// - `start` on a running transport fails with `AlreadyStarted`.
/// - `send` before `start` or after `close` fails with `NotConnected`.
/// - `close` is idempotent. After it returns no message or error callback
///   fires, and `on_close` has fired exactly once for this run.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Returns the type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Returns the capabilities of this transport.
    fn capabilities(&self) -> &TransportCapabilities;

    /// Returns the current state of the transport.
    fn state(&self) -> TransportState;

    /// Installs the callback sink. Must be called before `start`.
    fn set_handler(&self, handler: Arc<dyn TransportHandler>);

    /// Establishes the channel and begins delivering inbound messages.
    fn start(&self) -> TransportFuture<'_, ()>;

    /// Writes one message or batch. Outbound order equals call order.
    fn send(&self, payload: JsonRpcPayload, options: SendOptions) -> TransportFuture<'_, ()>;

    /// Releases every resource held by the transport.
    fn close(&self) -> TransportFuture<'_, ()>;

    /// Session id negotiated with the peer, if the transport carries one.
    fn session_id(&self) -> Option<String> {
        None
    }

    /// Overrides the session id attached to outbound requests.
    fn set_session_id(&self, session_id: Option<String>) {
        let _ = session_id;
    }

    /// Asks the transport to replay everything after `last_event_id` before
    /// resuming live delivery. Returns `false` when resumption is unsupported.
    ///
    /// Called before `start`, it records the resume point for the stream
    /// `start` opens.
    fn resume(&self, last_event_id: String) -> TransportFuture<'_, bool> {
        let _ = last_event_id;
        Box::pin(async { Ok(false) })
    }

    /// Id of the last event received on a resumable stream
    fn last_event_id(&self) -> Option<String> {
        None
    }

    /// Returns `true` if the transport is currently in the `Connected` state.
    fn is_connected(&self) -> bool {
        matches!(self.state(), TransportState::Connected)
    }
}
