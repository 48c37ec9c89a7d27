//! Standard I/O transport implementation.
//!
//! The writer sits behind a `tokio::sync::Mutex` so concurrent `send` calls hit
//! the wire in call order. The reader runs on its own task and pushes every
//! parsed line into the installed [`HandlerSlot`].

use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use mcplink_protocol::JsonRpcPayload;
use mcplink_transport_traits::{
    HandlerSlot, LimitsConfig, SendOptions, Transport, TransportCapabilities, TransportError,
    TransportFuture, TransportHandler, TransportResult, TransportState, TransportType,
    validate_request_size, validate_response_size,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, error, trace, warn};

// Boxed async I/O so process stdio, child pipes and test duplexes share one type
type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;
type BoxedAsyncWrite = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;
type LineReader = FramedRead<BufReader<BoxedAsyncRead>, LinesCodec>;
type LineWriter = FramedWrite<BoxedAsyncWrite, LinesCodec>;

/// Where the transport gets its streams from
enum StreamSource {
    /// The current process's stdin/stdout
    ProcessStdio,
    /// Caller-provided streams, usable once
    Raw {
        reader: BoxedAsyncRead,
        writer: BoxedAsyncWrite,
    },
    /// A command spawned on every `start`
    Command(Command),
    /// Raw streams already handed to a run
    Consumed,
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessStdio => write!(f, "ProcessStdio"),
            Self::Raw { .. } => write!(f, "Raw"),
            Self::Command(command) => f.debug_tuple("Command").field(command).finish(),
            Self::Consumed => write!(f, "Consumed"),
        }
    }
}

/// Standard I/O transport
///
/// Supports communication over:
/// - Current process stdin/stdout ([`from_stdio`](Self::from_stdio))
/// - A spawned child process ([`from_child`](Self::from_child), [`from_command`](Self::from_command))
/// - Arbitrary async streams ([`from_raw`](Self::from_raw))
///
/// End of input on the reader closes the transport.
pub struct StdioTransport {
    source: Mutex<StreamSource>,
    transport_type: TransportType,
    capabilities: TransportCapabilities,
    limits: LimitsConfig,
    slot: Arc<HandlerSlot>,
    state: Arc<Mutex<TransportState>>,
    running: Arc<AtomicBool>,
    writer: TokioMutex<Option<LineWriter>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    child: TokioMutex<Option<Child>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("source", &*self.source.lock())
            .field("transport_type", &self.transport_type)
            .field("state", &*self.state.lock())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::from_stdio()
    }
}

impl StdioTransport {
    fn with_source(source: StreamSource, transport_type: TransportType) -> Self {
        Self {
            source: Mutex::new(source),
            transport_type,
            capabilities: TransportCapabilities {
                max_message_size: Some(mcplink_protocol::MAX_MESSAGE_SIZE),
                ..TransportCapabilities::default()
            },
            limits: LimitsConfig::default(),
            slot: Arc::new(HandlerSlot::new()),
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            running: Arc::new(AtomicBool::new(false)),
            writer: TokioMutex::new(None),
            reader_task: Mutex::new(None),
            child: TokioMutex::new(None),
        }
    }

    /// Use the current process's stdin/stdout. Servers launched by a host use this.
    #[must_use]
    pub fn from_stdio() -> Self {
        Self::with_source(StreamSource::ProcessStdio, TransportType::Stdio)
    }

    /// Wrap a spawned child process. The child is killed on close.
    ///
    /// The child must have been spawned with `stdin(Stdio::piped())` and
    /// `stdout(Stdio::piped())`.
    pub fn from_child(mut child: Child) -> TransportResult<Self> {
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::ConfigurationError(
                "Child process stdin was not piped. Use Stdio::piped() when spawning.".to_string(),
            )
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::ConfigurationError(
                "Child process stdout was not piped. Use Stdio::piped() when spawning.".to_string(),
            )
        })?;

        Ok(Self {
            child: TokioMutex::new(Some(child)),
            ..Self::with_source(
                StreamSource::Raw {
                    reader: Box::pin(stdout),
                    writer: Box::pin(stdin),
                },
                TransportType::ChildProcess,
            )
        })
    }

    /// Spawn `command` on `start`, with piped stdin/stdout and inherited stderr.
    ///
    /// Unlike the other sources this one can be restarted after `close`.
    #[must_use]
    pub fn from_command(mut command: Command) -> Self {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        Self::with_source(StreamSource::Command(command), TransportType::ChildProcess)
    }

    /// Use arbitrary streams: `reader` is what we read from (e.g. the peer's
    /// stdout), `writer` is what we write to (e.g. the peer's stdin).
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        Self::with_source(
            StreamSource::Raw {
                reader: Box::pin(reader),
                writer: Box::pin(writer),
            },
            TransportType::Stdio,
        )
    }

    /// Apply message size limits
    #[must_use]
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.capabilities.max_message_size = limits.max_request_size;
        self.limits = limits;
        self
    }

    fn set_state(state: &Mutex<TransportState>, new_state: TransportState) {
        let mut state = state.lock();
        if *state != new_state {
            trace!("Stdio transport state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    /// Resolve the configured source into a reader/writer pair, spawning the
    /// child process when needed.
    async fn open_streams(&self) -> TransportResult<(BoxedAsyncRead, BoxedAsyncWrite)> {
        let spawned = {
            let mut source = self.source.lock();
            match std::mem::replace(&mut *source, StreamSource::Consumed) {
                StreamSource::ProcessStdio => {
                    *source = StreamSource::ProcessStdio;
                    let reader: BoxedAsyncRead = Box::pin(tokio::io::stdin());
                    let writer: BoxedAsyncWrite = Box::pin(tokio::io::stdout());
                    return Ok((reader, writer));
                }
                StreamSource::Raw { reader, writer } => return Ok((reader, writer)),
                StreamSource::Command(mut command) => {
                    let spawned = command.spawn();
                    *source = StreamSource::Command(command);
                    spawned
                }
                StreamSource::Consumed => {
                    return Err(TransportError::ConfigurationError(
                        "Raw stdio streams already consumed; create a new transport".to_string(),
                    ));
                }
            }
        };

        let mut child = spawned
            .map_err(|e| TransportError::ConnectionFailed(format!("failed to spawn: {e}")))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::ConfigurationError(
                "spawned child has no piped stdio".to_string(),
            ));
        };
        debug!(pid = ?child.id(), "spawned stdio child process");
        *self.child.lock().await = Some(child);
        Ok((Box::pin(stdout), Box::pin(stdin)))
    }

    fn spawn_reader(&self, mut reader: LineReader) -> JoinHandle<()> {
        let slot = Arc::clone(&self.slot);
        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let limits = self.limits.clone();

        tokio::spawn(async move {
            while let Some(result) = reader.next().await {
                match result {
                    Ok(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        trace!("Received line: {} bytes", line.len());

                        if let Err(e) = validate_response_size(line.len(), &limits) {
                            warn!("Inbound message dropped: {}", e);
                            slot.error(e);
                            continue;
                        }

                        match serde_json::from_str(line) {
                            Ok(value) => slot.message(value, None),
                            Err(e) => {
                                warn!("Failed to parse line: {}", e);
                                slot.error(TransportError::SerializationFailed(e.to_string()));
                            }
                        }
                    }
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        slot.error(TransportError::ProtocolError(
                            "line length limit exceeded".to_string(),
                        ));
                    }
                    Err(LinesCodecError::Io(e)) => {
                        error!("Failed to read from stdio: {}", e);
                        slot.error(TransportError::ReceiveFailed(e.to_string()));
                        break;
                    }
                }
            }

            debug!("Stdio reader reached end of input");
            running.store(false, Ordering::Release);
            Self::set_state(&state, TransportState::Disconnected);
            slot.close();
        })
    }

    fn encode(payload: &JsonRpcPayload) -> TransportResult<String> {
        let line = serde_json::to_string(payload)?;
        // Messages are delimited by newlines and must not contain embedded ones
        if line.contains('\n') || line.contains('\r') {
            return Err(TransportError::ProtocolError(
                "Message contains embedded newlines".to_string(),
            ));
        }
        Ok(line)
    }

    async fn shutdown_child(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("child already exited: {}", e);
            }
        }
    }
}

impl Transport for StdioTransport {
    fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    fn state(&self) -> TransportState {
        self.state.lock().clone()
    }

    fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        self.slot.set(handler);
    }

    fn start(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.running.swap(true, Ordering::AcqRel) {
                return Err(TransportError::AlreadyStarted);
            }
            Self::set_state(&self.state, TransportState::Connecting);

            let (reader, writer) = match self.open_streams().await {
                Ok(streams) => streams,
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    Self::set_state(
                        &self.state,
                        TransportState::Failed {
                            reason: e.to_string(),
                        },
                    );
                    error!("Failed to start stdio transport: {}", e);
                    return Err(e);
                }
            };

            self.slot.rearm();
            *self.writer.lock().await = Some(FramedWrite::new(writer, LinesCodec::new()));
            let reader = FramedRead::new(BufReader::new(reader), LinesCodec::new());
            *self.reader_task.lock() = Some(self.spawn_reader(reader));

            Self::set_state(&self.state, TransportState::Connected);
            debug!(transport_type = %self.transport_type, "Stdio transport started");
            Ok(())
        })
    }

    fn send(&self, payload: JsonRpcPayload, _options: SendOptions) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.running.load(Ordering::Acquire) || self.slot.is_closed() {
                return Err(TransportError::NotConnected);
            }

            let line = Self::encode(&payload)?;
            validate_request_size(line.len(), &self.limits)?;
            let size = line.len();

            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                return Err(TransportError::NotConnected);
            };
            if let Err(e) = writer.send(line).await {
                error!("Failed to send message: {}", e);
                let err = TransportError::SendFailed(e.to_string());
                self.slot.error(err.clone());
                return Err(err);
            }
            trace!("Sent message: {} bytes", size);
            Ok(())
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            Self::set_state(&self.state, TransportState::Disconnecting);

            if let Some(handle) = self.reader_task.lock().take() {
                handle.abort();
            }
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = SinkExt::<String>::close(&mut writer).await;
            }
            self.shutdown_child().await;

            self.running.store(false, Ordering::Release);
            Self::set_state(&self.state, TransportState::Disconnected);
            if self.slot.close() {
                debug!("Stdio transport closed");
            }
            Ok(())
        })
    }
}
