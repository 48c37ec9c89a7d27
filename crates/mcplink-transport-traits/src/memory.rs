//! Linked in-process transport pair.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mcplink_protocol::JsonRpcPayload;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::LimitsConfig;
use crate::error::{TransportError, validate_request_size};
use crate::handler::{HandlerSlot, TransportHandler};
use crate::traits::{Transport, TransportFuture};
use crate::types::{SendOptions, TransportCapabilities, TransportState, TransportType};

enum Frame {
    Message(Value),
    Close,
}

struct Side {
    slot: HandlerSlot,
    state: Mutex<TransportState>,
    started: AtomicBool,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Side {
    fn new(inbound: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self {
            slot: HandlerSlot::new(),
            state: Mutex::new(TransportState::Disconnected),
            started: AtomicBool::new(false),
            inbound: Mutex::new(Some(inbound)),
            reader: Mutex::new(None),
        }
    }

    fn finish(&self) {
        *self.state.lock() = TransportState::Disconnected;
        if self.slot.close() {
            tracing::debug!("in-memory transport closed");
        }
    }
}

/// One end of an in-process connection.
///
/// Each `send` is delivered to the peer's `on_message`, in order, through an
/// unbounded channel drained by a forwarding task. Messages sent before the
/// peer starts are buffered. Closing either end closes both.
pub struct InMemoryTransport {
    side: Arc<Side>,
    peer: mpsc::UnboundedSender<Frame>,
    capabilities: TransportCapabilities,
    limits: LimitsConfig,
}

impl fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("state", &*self.side.state.lock())
            .field("slot", &self.side.slot)
            .finish()
    }
}

impl InMemoryTransport {
    /// Create two linked transports
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_rx, b_tx), Self::new(b_rx, a_tx))
    }

    fn new(inbound: mpsc::UnboundedReceiver<Frame>, peer: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            side: Arc::new(Side::new(inbound)),
            peer,
            capabilities: TransportCapabilities::default(),
            limits: LimitsConfig::default(),
        }
    }

    /// Apply outbound size limits
    #[must_use]
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.capabilities.max_message_size = limits.max_request_size;
        self.limits = limits;
        self
    }
}

impl Transport for InMemoryTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::InMemory
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    fn state(&self) -> TransportState {
        self.side.state.lock().clone()
    }

    fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        self.side.slot.set(handler);
    }

    fn start(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.side.started.swap(true, Ordering::AcqRel) {
                return Err(TransportError::AlreadyStarted);
            }
            let Some(mut inbound) = self.side.inbound.lock().take() else {
                return Err(TransportError::ConnectionFailed(
                    "in-memory transport cannot be restarted".to_string(),
                ));
            };

            *self.side.state.lock() = TransportState::Connected;
            let side = Arc::clone(&self.side);
            let reader = tokio::spawn(async move {
                while let Some(frame) = inbound.recv().await {
                    match frame {
                        Frame::Message(value) => side.slot.message(value, None),
                        Frame::Close => break,
                    }
                }
                side.finish();
            });
            *self.side.reader.lock() = Some(reader);
            Ok(())
        })
    }

    fn send(&self, payload: JsonRpcPayload, _options: SendOptions) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.side.started.load(Ordering::Acquire) || self.side.slot.is_closed() {
                return Err(TransportError::NotConnected);
            }
            let bytes = serde_json::to_vec(&payload)?;
            validate_request_size(bytes.len(), &self.limits)?;
            let value: Value = serde_json::from_slice(&bytes)?;
            self.peer
                .send(Frame::Message(value))
                .map_err(|_| TransportError::ConnectionLost("peer dropped".to_string()))
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.side.slot.is_closed() {
                return Ok(());
            }
            *self.side.state.lock() = TransportState::Disconnecting;
            let _ = self.peer.send(Frame::Close);
            if let Some(reader) = self.side.reader.lock().take() {
                reader.abort();
            }
            self.side.finish();
            Ok(())
        })
    }
}

impl Drop for InMemoryTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.side.reader.lock().take() {
            reader.abort();
        }
    }
}
