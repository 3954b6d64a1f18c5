//! # Sirocco Client
//!
//! A resilient WebSocket client: one logical connection that survives
//! transient network failure.
//!
//! This crate provides:
//! - Automatic reconnection driven by a [`Throttle`](sirocco_core::throttle::Throttle) schedule
//! - Offline buffering of outbound messages, drained FIFO on reconnect
//! - Idle-driven ping/pong liveness probing
//! - An application-level acknowledgement layer over text frames
//! - A connection lifecycle state machine with a single-writer supervisor
//!
//! # Example
//!
//! ```ignore
//! use sirocco_client::{ConnectionSettings, OutMessage, WebSocketClient};
//! use sirocco_core::throttle::Throttle;
//! use std::time::Duration;
//!
//! let settings = ConnectionSettings::builder()
//!     .url("wss://example.com/stream")
//!     .throttle(Throttle::exponential(
//!         Duration::from_secs(1),
//!         Duration::from_secs(60),
//!         2.0,
//!     ))
//!     .build();
//!
//! let mut client = WebSocketClient::new(settings);
//! client.connect().await?;
//! client.send(OutMessage::text("hello")).await?;
//! ```
//!
//! # Limitations
//!
//! Continuation frames are not reassembled: fragmented messages are
//! logged and dropped. The legacy hixie-76 handshake is implemented but
//! cannot be driven end to end because only RFC 6455 framing is
//! available; see the [`handshake`] module.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

/// Acknowledgement registry
mod ack;

/// Offline message buffering
pub mod buffer;

/// Client facade and connection supervisor
mod client;

/// HTTP upgrade handshake
pub mod handshake;

/// Application message types
pub mod message;

/// Inbound frame routing
mod router;

/// Connection settings
pub mod settings;

/// Connection lifecycle state
pub mod state;

pub use buffer::{BackupBuffer, MemoryBuffer};
pub use client::{ReceiveHandler, WebSocketClient};
pub use handshake::{HandshakeDriver, HandshakePhase};
pub use message::{InMessage, OutMessage};
pub use settings::{ConnectionSettings, ConnectionSettingsBuilder, ProtocolVersion};
pub use state::ConnectionPhase;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::buffer::{BackupBuffer, MemoryBuffer};
    pub use crate::client::{ReceiveHandler, WebSocketClient};
    pub use crate::message::{InMessage, OutMessage};
    pub use crate::settings::{ConnectionSettings, ProtocolVersion};
    pub use crate::state::ConnectionPhase;
    pub use sirocco_core::completion::Completion;
    pub use sirocco_core::error::ClientError;
    pub use sirocco_core::throttle::Throttle;
}
