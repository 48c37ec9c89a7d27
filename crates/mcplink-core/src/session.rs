//! Connection lifecycle and capability gating.
//!
//! A [`Session`] tracks where one connection is in its lifecycle and decides,
//! before anything is serialized, whether a method may be sent or dispatched.
//!
//! ```text
//! Disconnected -> Connecting -> Initializing -> Initialized -> Operating
//!                      \              \              \            |
//!                       `--------------`--------------`--> ShuttingDown -> Terminated
//! ```
//!
//! `Terminated` and `Error` are terminal. Every move is a single
//! compare-and-swap on an [`AtomicU8`], so two tasks racing on the same edge
//! see exactly one winner.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use mcplink_protocol::capabilities::{
    handler_requirement, notification_requirement, request_requirement,
};
use mcplink_protocol::{
    ClientCapabilities, ErrorKind, Implementation, McpError, McpResult, NegotiatedCapabilities,
    Requirement, Role, ServerCapabilities, methods,
};
use parking_lot::RwLock;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// Nothing started yet
    Disconnected = 0,
    /// Transport starting
    Connecting = 1,
    /// Handshake in progress
    Initializing = 2,
    /// Handshake complete, `on_initialized` hook pending
    Initialized = 3,
    /// Normal operation
    Operating = 4,
    /// Graceful shutdown in progress
    ShuttingDown = 5,
    /// Closed (terminal)
    Terminated = 6,
    /// Failed (terminal)
    Error = 7,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Initializing,
            3 => Self::Initialized,
            4 => Self::Operating,
            5 => Self::ShuttingDown,
            6 => Self::Terminated,
            _ => Self::Error,
        }
    }

    /// Whether no further transition is possible
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }

    /// Whether the handshake has completed
    pub const fn is_initialized(self) -> bool {
        matches!(self, Self::Initialized | Self::Operating)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph
    pub const fn can_transition_to(self, to: Self) -> bool {
        use SessionState as S;
        matches!(
            (self, to),
            (S::Disconnected, S::Connecting)
                | (S::Connecting, S::Initializing)
                | (S::Initializing, S::Initialized)
                | (S::Initialized, S::Operating)
                | (
                    S::Connecting | S::Initializing | S::Initialized | S::Operating,
                    S::ShuttingDown
                )
                | (S::ShuttingDown, S::Terminated)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Operating => "operating",
            Self::ShuttingDown => "shutting_down",
            Self::Terminated => "terminated",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything fixed by a completed `initialize` exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    /// Both capability sets
    pub capabilities: NegotiatedCapabilities,
    /// Agreed protocol version
    pub protocol_version: String,
    /// The peer's implementation info
    pub peer_info: Implementation,
    /// Server instructions, if any
    pub instructions: Option<String>,
}

type CloseObserver = Arc<dyn Fn(SessionState) + Send + Sync>;

/// Lifecycle state machine and capability gate for one connection.
pub struct Session {
    role: Role,
    state: AtomicU8,
    strict: bool,
    local: RwLock<NegotiatedCapabilities>,
    negotiated: RwLock<Option<Negotiated>>,
    close_observer: RwLock<Option<CloseObserver>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("strict", &self.strict)
            .field("initialized", &self.negotiated.read().is_some())
            .finish()
    }
}

impl Session {
    /// Create a session for the given local role
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: AtomicU8::new(SessionState::Disconnected as u8),
            strict: false,
            local: RwLock::new(NegotiatedCapabilities::default()),
            negotiated: RwLock::new(None),
            close_observer: RwLock::new(None),
        }
    }

    /// Reject unknown methods instead of passing them through
    #[must_use]
    pub fn with_strict_capabilities(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the capabilities this side advertises as a client
    #[must_use]
    pub fn with_client_capabilities(self, capabilities: ClientCapabilities) -> Self {
        self.local.write().client = capabilities;
        self
    }

    /// Set the capabilities this side advertises as a server
    #[must_use]
    pub fn with_server_capabilities(self, capabilities: ServerCapabilities) -> Self {
        self.local.write().server = capabilities;
        self
    }

    /// Local role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether unknown methods are rejected
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `from -> to` atomically.
    ///
    /// Fails with `InvalidStateTransition` when the edge does not exist or the
    /// session is no longer in `from`; the message reports the actual state.
    pub fn transition(&self, from: SessionState, to: SessionState) -> McpResult<()> {
        if !from.can_transition_to(to) {
            return Err(invalid_transition(from, to, self.state()));
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|actual| invalid_transition(from, to, SessionState::from_u8(actual)))?;
        tracing::debug!(role = %self.role, %from, %to, "session state changed");
        Ok(())
    }

    /// Move to a terminal state from any non-terminal state
    pub fn force(&self, to: SessionState) -> McpResult<()> {
        if !to.is_terminal() {
            return Err(McpError::new(
                ErrorKind::InvalidStateTransition,
                format!("cannot force non-terminal state {to}"),
            ));
        }
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = SessionState::from_u8(current);
            if from.is_terminal() {
                return Err(invalid_transition(from, to, from));
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::debug!(role = %self.role, %from, %to, "session state forced");
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Enter `ShuttingDown` from whatever live state the session is in.
    /// Returns `false` when the session was already shutting down or closed.
    pub fn begin_shutdown(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = SessionState::from_u8(current);
            if !from.can_transition_to(SessionState::ShuttingDown) {
                if from == SessionState::Disconnected {
                    return self.force(SessionState::Terminated).is_ok();
                }
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// React to the transport closing: mid-handshake sessions fail, live ones
    /// terminate. Runs the close observer once and returns the final state.
    pub fn on_transport_closed(&self) -> SessionState {
        let state = self.state();
        if state.is_terminal() {
            return state;
        }
        let outcome = match state {
            SessionState::ShuttingDown => self
                .transition(SessionState::ShuttingDown, SessionState::Terminated)
                .or_else(|_| self.force(SessionState::Terminated)),
            SessionState::Connecting | SessionState::Initializing => {
                self.force(SessionState::Error)
            }
            _ => self.force(SessionState::Terminated),
        };
        let final_state = self.state();
        if outcome.is_ok() {
            let observer = self.close_observer.read().clone();
            if let Some(observer) = observer {
                observer(final_state);
            }
        }
        final_state
    }

    /// Install a callback run once when the connection ends
    pub fn set_close_observer(&self, observer: impl Fn(SessionState) + Send + Sync + 'static) {
        *self.close_observer.write() = Some(Arc::new(observer));
    }

    /// Replace the advertised client capabilities. Fails once initialized.
    pub fn register_client_capabilities(&self, capabilities: ClientCapabilities) -> McpResult<()> {
        self.ensure_not_negotiated()?;
        self.local.write().client = capabilities;
        Ok(())
    }

    /// Replace the advertised server capabilities. Fails once initialized.
    pub fn register_server_capabilities(&self, capabilities: ServerCapabilities) -> McpResult<()> {
        self.ensure_not_negotiated()?;
        self.local.write().server = capabilities;
        Ok(())
    }

    fn ensure_not_negotiated(&self) -> McpResult<()> {
        if self.negotiated.read().is_some() {
            return Err(McpError::already_initialized(
                "capabilities are fixed after initialization",
            ));
        }
        Ok(())
    }

    /// Capabilities this side advertises
    pub fn local_capabilities(&self) -> NegotiatedCapabilities {
        self.local.read().clone()
    }

    /// Record the outcome of the handshake. Fails if one is already recorded.
    pub fn complete_handshake(&self, negotiated: Negotiated) -> McpResult<()> {
        let mut slot = self.negotiated.write();
        if slot.is_some() {
            return Err(McpError::already_initialized("Server already initialized"));
        }
        tracing::info!(
            role = %self.role,
            protocol_version = %negotiated.protocol_version,
            peer = %negotiated.peer_info.name,
            "handshake complete"
        );
        *slot = Some(negotiated);
        Ok(())
    }

    /// Handshake outcome, once recorded
    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated.read().clone()
    }

    /// Whether the handshake outcome is recorded
    pub fn is_negotiated(&self) -> bool {
        self.negotiated.read().is_some()
    }

    fn ensure_open(&self) -> McpResult<()> {
        match self.state() {
            SessionState::Disconnected => Err(McpError::not_connected("session not connected")),
            SessionState::ShuttingDown => Err(McpError::not_connected("session shutting down")),
            SessionState::Terminated | SessionState::Error => {
                Err(McpError::not_connected("session closed"))
            }
            _ => Ok(()),
        }
    }

    fn check(
        &self,
        requirement: Requirement,
        method: &str,
        view: &NegotiatedCapabilities,
    ) -> McpResult<()> {
        match requirement {
            Requirement::None => Ok(()),
            Requirement::Unknown if self.strict => Err(McpError::method_not_found(method)),
            Requirement::Unknown => Ok(()),
            other if view.satisfies(other) => Ok(()),
            other => Err(McpError::capability_not_supported(other.describe(), method)),
        }
    }

    /// Gate an outbound request before it is serialized
    pub fn check_outbound_request(&self, method: &str) -> McpResult<()> {
        self.ensure_open()?;
        let requirement = request_requirement(self.role, method);
        if requirement == Requirement::None {
            return Ok(());
        }
        let negotiated = self.negotiated.read();
        let Some(negotiated) = negotiated.as_ref() else {
            return Err(McpError::new(
                ErrorKind::NotInitialized,
                format!("session not initialized: cannot send {method}"),
            ));
        };
        self.check(requirement, method, &negotiated.capabilities)
    }

    /// Gate an outbound notification before it is serialized
    pub fn check_outbound_notification(&self, method: &str) -> McpResult<()> {
        self.ensure_open()?;
        let requirement = notification_requirement(self.role, method);
        let view = match self.negotiated.read().as_ref() {
            Some(negotiated) => negotiated.capabilities.clone(),
            None => self.local_capabilities(),
        };
        self.check(requirement, method, &view)
    }

    /// Gate a notification from the peer before it is queued for a handler.
    ///
    /// Until the handshake is recorded every notification passes, and methods
    /// without a known requirement always pass.
    pub fn check_inbound_notification(&self, method: &str) -> McpResult<()> {
        let requirement = notification_requirement(self.role.peer(), method);
        if matches!(requirement, Requirement::None | Requirement::Unknown) {
            return Ok(());
        }
        match self.negotiated.read().as_ref() {
            Some(negotiated) => self.check(requirement, method, &negotiated.capabilities),
            None => Ok(()),
        }
    }

    /// Gate an inbound request before its handler runs
    pub fn check_inbound_request(&self, method: &str) -> McpResult<()> {
        if method == methods::PING || method == methods::INITIALIZE {
            return Ok(());
        }
        if self.role == Role::Server
            && matches!(
                self.state(),
                SessionState::Disconnected | SessionState::Connecting | SessionState::Initializing
            )
        {
            return Err(McpError::not_initialized());
        }
        let local = self.local.read();
        self.check(handler_requirement(self.role, method), method, &local)
    }

    /// Assert the local side advertises what a handler for `method` needs
    pub fn check_handler_registration(&self, method: &str) -> McpResult<()> {
        let requirement = handler_requirement(self.role, method);
        if matches!(requirement, Requirement::None | Requirement::Unknown) {
            return Ok(());
        }
        let local = self.local.read();
        if local.satisfies(requirement) {
            Ok(())
        } else {
            Err(McpError::capability_not_supported(
                requirement.describe(),
                method,
            ))
        }
    }
}

fn invalid_transition(from: SessionState, to: SessionState, actual: SessionState) -> McpError {
    McpError::new(
        ErrorKind::InvalidStateTransition,
        format!("invalid state transition {from} -> {to} (current state: {actual})"),
    )
}
