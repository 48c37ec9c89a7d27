//! # mcplink Transport Traits
//!
//! The transport contract shared by every mcplink transport implementation.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`Transport`], [`TransportHandler`], [`EventStore`]
//! - **Types**: [`TransportType`], [`TransportState`], [`TransportCapabilities`],
//!   [`SendOptions`], [`AuthInfo`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **Config**: [`LimitsConfig`], [`TimeoutConfig`]
//! - **Helpers**: [`HandlerSlot`] for callback bookkeeping, [`InMemoryEventStore`],
//!   and the linked [`InMemoryTransport`] pair used as a test harness
//!
//! ## Usage
//!
//! A transport pushes inbound documents into the installed handler and accepts
//! outbound payloads through [`Transport::send`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcplink_protocol::{JsonRpcMessage, JsonRpcNotification};
//! use mcplink_transport_traits::{
//!     AuthInfo, InMemoryTransport, SendOptions, Transport, TransportError, TransportHandler,
//! };
//!
//! #[derive(Debug)]
//! struct Printer;
//!
//! impl TransportHandler for Printer {
//!     fn on_message(&self, message: serde_json::Value, _auth: Option<AuthInfo>) {
//!         println!("{message}");
//!     }
//!     fn on_error(&self, error: TransportError) {
//!         eprintln!("{error}");
//!     }
//!     fn on_close(&self) {}
//! }
//!
//! # async fn demo() -> Result<(), TransportError> {
//! let (a, b) = InMemoryTransport::pair();
//! b.set_handler(Arc::new(Printer));
//! a.start().await?;
//! b.start().await?;
//! let note = JsonRpcNotification::new("notifications/initialized", None);
//! a.send(JsonRpcMessage::from(note).into(), SendOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod config;
mod error;
mod event_store;
mod handler;
mod memory;
mod traits;
mod types;

// Re-export all public items
pub use config::{LimitsConfig, TimeoutConfig};
pub use error::{TransportError, TransportResult};
pub use event_store::{
    DEFAULT_MAX_EVENTS_PER_STREAM, DEFAULT_MAX_STREAMS, EventStore, InMemoryEventStore, StoredEvent,
};
pub use handler::{HandlerSlot, TransportHandler};
pub use memory::InMemoryTransport;
pub use traits::{Transport, TransportFuture};
pub use types::{AuthInfo, SendOptions, TransportCapabilities, TransportState, TransportType};

// Re-export validation functions
pub use error::{validate_request_size, validate_response_size};
