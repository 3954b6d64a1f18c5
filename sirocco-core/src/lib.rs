//! # Sirocco Core
//!
//! Core types for the sirocco resilient WebSocket client.
//!
//! This crate provides:
//! - Error types and severity classification (`ClientError`, `ErrorSeverity`)
//! - Operation outcomes (`Completion`)
//! - The reconnect schedule (`Throttle`), a lazy sequence of delays
//! - The ack-capable wire envelope and codec seam (`Envelope`, `WireFormat`)

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

/// Error types and severity classification
pub mod error;

/// Operation outcomes
pub mod completion;

/// Reconnect schedule
pub mod throttle;

/// Wire envelope and codec seam
pub mod wire;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::completion::Completion;
    pub use crate::error::{ClientError, ErrorSeverity};
    pub use crate::throttle::Throttle;
    pub use crate::wire::{Envelope, JsonWireFormat, WireFormat};
}
