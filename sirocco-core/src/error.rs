//! Error types for the sirocco client.
//!
//! A single error enum covers every failure surface of the client:
//! transport, handshake, framing protocol, wire serialization, and the
//! acknowledgement layer. Each variant carries a severity so callers (and
//! the reconnect loop) can decide between retry and surfacing.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error severity levels for categorizing errors.
///
/// - `Fatal`: the session cannot continue
/// - `Recoverable`: the reconnect loop may retry
/// - `Warning`: degraded but operational
/// - `Info`: expected condition worth noting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Unrecoverable error; the session is over.
    Fatal,

    /// Error that the reconnect loop can retry.
    #[default]
    Recoverable,

    /// Non-critical issue that should be logged but doesn't stop the client.
    Warning,

    /// Expected or handled condition.
    Info,
}

impl ErrorSeverity {
    /// Returns true if this severity permits a retry.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }

    /// Returns true if this severity is fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Returns the severity as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Recoverable => "RECOVERABLE",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client error covering transport, handshake, protocol, serialization,
/// and acknowledgement failures.
///
/// # Examples
///
/// ```
/// use sirocco_core::error::ClientError;
///
/// let error = ClientError::Transport {
///     reason: "connection refused".to_string(),
/// };
/// assert!(error.to_string().contains("connection refused"));
/// assert!(error.is_recoverable());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientError {
    /// TCP connect failed or the connection dropped unexpectedly.
    #[error("[Transport] {reason}")]
    Transport {
        /// Reason for the transport failure.
        reason: String,
    },

    /// The connect attempt exceeded its wall-clock bound.
    #[error("[Transport] connect timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The HTTP upgrade exchange failed.
    #[error("[Handshake] {reason}")]
    Handshake {
        /// Reason for the handshake failure.
        reason: String,
    },

    /// The peer violated the framing protocol after the upgrade.
    #[error("[Protocol] {reason}")]
    Protocol {
        /// Reason for the protocol violation.
        reason: String,
    },

    /// The wire format could not render an outbound message.
    #[error("[Serialization] {reason}")]
    Serialization {
        /// Reason for the serialization failure.
        reason: String,
    },

    /// No acknowledgement arrived for an ack-wrapped message in time.
    #[error("[Ack] no acknowledgement for message {id} within {timeout_ms}ms")]
    AckTimeout {
        /// Id assigned to the unacknowledged message.
        id: u64,
        /// The caller-supplied timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The connection is closed.
    #[error("[Closed] {reason}")]
    Closed {
        /// Reason for the closure.
        reason: String,
    },
}

impl ClientError {
    /// Builds a `Transport` error from anything displayable.
    pub fn transport(reason: impl fmt::Display) -> Self {
        Self::Transport {
            reason: reason.to_string(),
        }
    }

    /// Builds a `Handshake` error from anything displayable.
    pub fn handshake(reason: impl fmt::Display) -> Self {
        Self::Handshake {
            reason: reason.to_string(),
        }
    }

    /// Builds a `Protocol` error from anything displayable.
    pub fn protocol(reason: impl fmt::Display) -> Self {
        Self::Protocol {
            reason: reason.to_string(),
        }
    }

    /// Builds a `Serialization` error from anything displayable.
    pub fn serialization(reason: impl fmt::Display) -> Self {
        Self::Serialization {
            reason: reason.to_string(),
        }
    }

    /// Builds a `Closed` error from anything displayable.
    pub fn closed(reason: impl fmt::Display) -> Self {
        Self::Closed {
            reason: reason.to_string(),
        }
    }

    /// Returns true if the reconnect loop may retry after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.severity().is_recoverable()
    }

    /// Returns the severity level of this error.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::Handshake { .. }
            | Self::Protocol { .. } => ErrorSeverity::Recoverable,
            Self::Serialization { .. } | Self::AckTimeout { .. } => ErrorSeverity::Warning,
            Self::Closed { .. } => ErrorSeverity::Info,
        }
    }
}
