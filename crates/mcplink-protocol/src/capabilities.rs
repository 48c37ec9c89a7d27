//! # Capability negotiation and gating
//!
//! [`ClientCapabilities`] and [`ServerCapabilities`] are exchanged once during
//! the initialize handshake. After that, every request or notification that a
//! side sends, and every one it dispatches, is checked against a fixed table
//! mapping the method name to the capability it needs ([`request_requirement`],
//! [`notification_requirement`]).
//!
//! ```rust
//! use mcplink_protocol::capabilities::*;
//!
//! let server = ServerCapabilities::default().enable_resources(false, false);
//! let negotiated = NegotiatedCapabilities::new(ClientCapabilities::default(), server);
//!
//! let req = request_requirement(Role::Client, "resources/subscribe");
//! assert_eq!(req, Requirement::Server(ServerCapability::ResourcesSubscribe));
//! assert!(!negotiated.satisfies(req));
//! assert!(negotiated.satisfies(request_requirement(Role::Client, "resources/read")));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::methods;

/// Client capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities that the client supports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,

    /// Present if the client supports listing roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapabilities>,

    /// Present if the client supports sampling from an LLM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapabilities>,

    /// Present if the client supports elicitation from the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<ElicitationCapabilities>,
}

/// Server capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Experimental, non-standard capabilities that the server supports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,

    /// Present if the server supports sending log messages to the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapabilities>,

    /// Present if the server supports argument autocompletion suggestions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionCapabilities>,

    /// Present if the server offers any prompt templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapabilities>,

    /// Present if the server offers any resources to read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapabilities>,

    /// Present if the server offers any tools to call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapabilities>,
}

/// Sampling capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SamplingCapabilities {}

/// Elicitation capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ElicitationCapabilities {}

/// Completion capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompletionCapabilities {}

/// Logging capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingCapabilities {}

/// Roots capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RootsCapabilities {
    /// Whether list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Prompts capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PromptsCapabilities {
    /// Whether list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resources capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourcesCapabilities {
    /// Whether subscribe is supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,

    /// Whether list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Tools capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolsCapabilities {
    /// Whether list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

fn flag(value: bool) -> Option<bool> {
    value.then_some(true)
}

impl ClientCapabilities {
    /// Advertise `roots`
    #[must_use]
    pub fn enable_roots(mut self, list_changed: bool) -> Self {
        self.roots = Some(RootsCapabilities {
            list_changed: flag(list_changed),
        });
        self
    }

    /// Advertise `sampling`
    #[must_use]
    pub fn enable_sampling(mut self) -> Self {
        self.sampling = Some(SamplingCapabilities {});
        self
    }

    /// Advertise `elicitation`
    #[must_use]
    pub fn enable_elicitation(mut self) -> Self {
        self.elicitation = Some(ElicitationCapabilities {});
        self
    }

    /// Add an experimental capability
    #[must_use]
    pub fn add_experimental(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.experimental
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Check a single client capability
    pub fn supports(&self, capability: ClientCapability) -> bool {
        match capability {
            ClientCapability::Roots => self.roots.is_some(),
            ClientCapability::RootsListChanged => self
                .roots
                .as_ref()
                .is_some_and(|r| r.list_changed == Some(true)),
            ClientCapability::Sampling => self.sampling.is_some(),
            ClientCapability::Elicitation => self.elicitation.is_some(),
        }
    }
}

impl ServerCapabilities {
    /// Advertise `logging`
    #[must_use]
    pub fn enable_logging(mut self) -> Self {
        self.logging = Some(LoggingCapabilities {});
        self
    }

    /// Advertise `completions`
    #[must_use]
    pub fn enable_completions(mut self) -> Self {
        self.completions = Some(CompletionCapabilities {});
        self
    }

    /// Advertise `prompts`
    #[must_use]
    pub fn enable_prompts(mut self, list_changed: bool) -> Self {
        self.prompts = Some(PromptsCapabilities {
            list_changed: flag(list_changed),
        });
        self
    }

    /// Advertise `resources`
    #[must_use]
    pub fn enable_resources(mut self, subscribe: bool, list_changed: bool) -> Self {
        self.resources = Some(ResourcesCapabilities {
            subscribe: flag(subscribe),
            list_changed: flag(list_changed),
        });
        self
    }

    /// Advertise `tools`
    #[must_use]
    pub fn enable_tools(mut self, list_changed: bool) -> Self {
        self.tools = Some(ToolsCapabilities {
            list_changed: flag(list_changed),
        });
        self
    }

    /// Add an experimental capability
    #[must_use]
    pub fn add_experimental(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.experimental
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Check a single server capability
    pub fn supports(&self, capability: ServerCapability) -> bool {
        match capability {
            ServerCapability::Logging => self.logging.is_some(),
            ServerCapability::Completions => self.completions.is_some(),
            ServerCapability::Prompts => self.prompts.is_some(),
            ServerCapability::PromptsListChanged => self
                .prompts
                .as_ref()
                .is_some_and(|p| p.list_changed == Some(true)),
            ServerCapability::Resources => self.resources.is_some(),
            ServerCapability::ResourcesSubscribe => self
                .resources
                .as_ref()
                .is_some_and(|r| r.subscribe == Some(true)),
            ServerCapability::ResourcesListChanged => self
                .resources
                .as_ref()
                .is_some_and(|r| r.list_changed == Some(true)),
            ServerCapability::Tools => self.tools.is_some(),
            ServerCapability::ToolsListChanged => self
                .tools
                .as_ref()
                .is_some_and(|t| t.list_changed == Some(true)),
        }
    }
}

/// Which side of the connection sends a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The MCP client
    Client,
    /// The MCP server
    Server,
}

impl Role {
    /// The other side
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// A capability path advertised by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientCapability {
    /// `roots`
    Roots,
    /// `roots.listChanged`
    RootsListChanged,
    /// `sampling`
    Sampling,
    /// `elicitation`
    Elicitation,
}

impl ClientCapability {
    /// Dotted capability path
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Roots => "roots",
            Self::RootsListChanged => "roots.listChanged",
            Self::Sampling => "sampling",
            Self::Elicitation => "elicitation",
        }
    }
}

/// A capability path advertised by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerCapability {
    /// `logging`
    Logging,
    /// `completions`
    Completions,
    /// `prompts`
    Prompts,
    /// `prompts.listChanged`
    PromptsListChanged,
    /// `resources`
    Resources,
    /// `resources.subscribe`
    ResourcesSubscribe,
    /// `resources.listChanged`
    ResourcesListChanged,
    /// `tools`
    Tools,
    /// `tools.listChanged`
    ToolsListChanged,
}

impl ServerCapability {
    /// Dotted capability path
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Logging => "logging",
            Self::Completions => "completions",
            Self::Prompts => "prompts",
            Self::PromptsListChanged => "prompts.listChanged",
            Self::Resources => "resources",
            Self::ResourcesSubscribe => "resources.subscribe",
            Self::ResourcesListChanged => "resources.listChanged",
            Self::Tools => "tools",
            Self::ToolsListChanged => "tools.listChanged",
        }
    }
}

/// What a method needs before it may be sent or dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Always allowed (`ping`, `initialize`, lifecycle notifications)
    None,
    /// Needs a client capability
    Client(ClientCapability),
    /// Needs a server capability
    Server(ServerCapability),
    /// Not in the table; allowed unless strict checking is on
    Unknown,
}

impl Requirement {
    /// Dotted path of the capability, prefixed by the side that must advertise it
    pub fn describe(self) -> String {
        match self {
            Self::None => "none".to_string(),
            Self::Client(c) => format!("client {}", c.as_str()),
            Self::Server(s) => format!("server {}", s.as_str()),
            Self::Unknown => "unknown method".to_string(),
        }
    }
}

/// Capability needed for `sender` to send the request `method`.
///
/// Dispatching an inbound request uses the same table with the peer as sender.
pub fn request_requirement(sender: Role, method: &str) -> Requirement {
    use ClientCapability as C;
    use ServerCapability as S;

    if method == methods::PING {
        return Requirement::None;
    }

    match sender {
        Role::Client => match method {
            methods::INITIALIZE => Requirement::None,
            methods::LOGGING_SET_LEVEL => Requirement::Server(S::Logging),
            methods::PROMPTS_GET | methods::PROMPTS_LIST => Requirement::Server(S::Prompts),
            methods::RESOURCES_LIST
            | methods::RESOURCES_TEMPLATES_LIST
            | methods::RESOURCES_READ
            | methods::RESOURCES_UNSUBSCRIBE => Requirement::Server(S::Resources),
            methods::RESOURCES_SUBSCRIBE => Requirement::Server(S::ResourcesSubscribe),
            methods::TOOLS_CALL | methods::TOOLS_LIST => Requirement::Server(S::Tools),
            methods::COMPLETION_COMPLETE => Requirement::Server(S::Completions),
            _ => Requirement::Unknown,
        },
        Role::Server => match method {
            methods::SAMPLING_CREATE_MESSAGE => Requirement::Client(C::Sampling),
            methods::ROOTS_LIST => Requirement::Client(C::Roots),
            methods::ELICITATION_CREATE => Requirement::Client(C::Elicitation),
            _ => Requirement::Unknown,
        },
    }
}

/// Capability needed for `sender` to send the notification `method`.
pub fn notification_requirement(sender: Role, method: &str) -> Requirement {
    use ClientCapability as C;
    use ServerCapability as S;

    match method {
        methods::NOTIFICATION_CANCELLED | methods::NOTIFICATION_PROGRESS => {
            return Requirement::None;
        }
        _ => {}
    }

    match sender {
        Role::Client => match method {
            methods::NOTIFICATION_INITIALIZED => Requirement::None,
            methods::NOTIFICATION_ROOTS_LIST_CHANGED => Requirement::Client(C::RootsListChanged),
            _ => Requirement::Unknown,
        },
        Role::Server => match method {
            methods::NOTIFICATION_MESSAGE => Requirement::Server(S::Logging),
            methods::NOTIFICATION_RESOURCES_UPDATED
            | methods::NOTIFICATION_RESOURCES_LIST_CHANGED => Requirement::Server(S::Resources),
            methods::NOTIFICATION_TOOLS_LIST_CHANGED => Requirement::Server(S::ToolsListChanged),
            methods::NOTIFICATION_PROMPTS_LIST_CHANGED => {
                Requirement::Server(S::PromptsListChanged)
            }
            _ => Requirement::Unknown,
        },
    }
}

/// Capability the local side must itself advertise to register a handler for
/// the request `method`.
pub fn handler_requirement(local: Role, method: &str) -> Requirement {
    request_requirement(local.peer(), method)
}

/// Both capability sets as fixed at the end of the handshake
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NegotiatedCapabilities {
    /// Client side
    pub client: ClientCapabilities,
    /// Server side
    pub server: ServerCapabilities,
}

impl NegotiatedCapabilities {
    /// Pair the two capability sets
    pub fn new(client: ClientCapabilities, server: ServerCapabilities) -> Self {
        Self { client, server }
    }

    /// Whether a requirement holds. `Unknown` is satisfied; strictness is the
    /// caller's decision.
    pub fn satisfies(&self, requirement: Requirement) -> bool {
        match requirement {
            Requirement::None | Requirement::Unknown => true,
            Requirement::Client(c) => self.client.supports(c),
            Requirement::Server(s) => self.server.supports(s),
        }
    }
}
