//! Inbound callback sink and the bookkeeping every transport shares.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::TransportError;
use crate::types::AuthInfo;

/// Receives everything a transport reads.
///
/// Callbacks run on the transport's reader task and must not block; the
/// protocol engine forwards them onto its own queue.
pub trait TransportHandler: Send + Sync {
    /// One parsed JSON document (single message or batch array).
    fn on_message(&self, message: Value, auth: Option<AuthInfo>);

    /// A non-fatal read or write failure.
    fn on_error(&self, error: TransportError);

    /// The transport has closed. Fires once per run.
    fn on_close(&self);
}

/// Holds the installed handler and guarantees the callback ordering rules:
/// nothing fires after close, and `on_close` fires once per run.
#[derive(Default)]
pub struct HandlerSlot {
    handler: RwLock<Option<Arc<dyn TransportHandler>>>,
    closed: AtomicBool,
}

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("installed", &self.handler.read().is_some())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl HandlerSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the handler
    pub fn set(&self, handler: Arc<dyn TransportHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Re-arm the slot for a new run after a close
    pub fn rearm(&self) {
        self.closed.store(false, Ordering::Release);
    }

    /// Whether this run has closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn current(&self) -> Option<Arc<dyn TransportHandler>> {
        if self.is_closed() {
            return None;
        }
        self.handler.read().clone()
    }

    /// Deliver an inbound document
    pub fn message(&self, message: Value, auth: Option<AuthInfo>) {
        match self.current() {
            Some(handler) => handler.on_message(message, auth),
            None => tracing::trace!("dropping inbound message: no handler or closed"),
        }
    }

    /// Report a non-fatal error
    pub fn error(&self, error: TransportError) {
        match self.current() {
            Some(handler) => handler.on_error(error),
            None => tracing::debug!(%error, "transport error after close"),
        }
    }

    /// Mark the run closed and fire `on_close`. Returns `true` only for the
    /// call that performed the transition.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(handler) = self.handler.read().clone() {
            handler.on_close();
        }
        true
    }
}
