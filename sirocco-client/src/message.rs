//! Application message types.
//!
//! [`InMessage`] is what the registered receive handler observes: lifecycle
//! events, application payloads, and ack failures. [`OutMessage`] is what
//! callers hand to `send`: plain payloads or an [`OutMessage::Ackable`]
//! wrapper demanding acknowledgement within a timeout. The wire-level
//! `Ack`/`AckRequest` envelopes never surface here; the router and the ack
//! registry consume them.

use serde_json::Value;
use sirocco_core::error::ClientError;
use sirocco_core::wire::Envelope;
use std::time::Duration;

/// An inbound event delivered to the receive handler.
#[derive(Debug, Clone, PartialEq)]
pub enum InMessage {
    /// The connection reached Open and any buffered backlog was drained.
    Connected,

    /// A reconnect episode began; emitted at most once per episode.
    Reconnecting,

    /// The connection closed for good, with an optional reason.
    Disconnected(Option<String>),

    /// An error surfaced from the transport or protocol layer.
    Error(ClientError),

    /// Text payload from the peer.
    Text(String),

    /// Structured JSON payload from the peer.
    Json(Value),

    /// Binary payload from the peer.
    Binary(Vec<u8>),

    /// An ack-wrapped send was not acknowledged within its timeout.
    AckFailed(Box<OutMessage>),
}

impl InMessage {
    /// Short name of the variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected(_) => "disconnected",
            Self::Error(_) => "error",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Binary(_) => "binary",
            Self::AckFailed(_) => "ack_failed",
        }
    }

    /// Returns true if this is a lifecycle event rather than a payload.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Reconnecting | Self::Disconnected(_) | Self::Error(_)
        )
    }

    /// Returns the text content if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Maps a payload envelope to its application message.
    ///
    /// `Ack` and `AckRequest` envelopes have no application form and map
    /// to `None`; the router consumes those before delivery.
    #[must_use]
    pub fn from_payload(envelope: Envelope) -> Option<Self> {
        match envelope {
            Envelope::Text { body } => Some(Self::Text(body)),
            Envelope::Json { body } => Some(Self::Json(body)),
            Envelope::Ack { .. } | Envelope::AckRequest { .. } => None,
        }
    }
}

/// An outbound message handed to `send`.
#[derive(Debug, Clone, PartialEq)]
pub enum OutMessage {
    /// Text payload.
    Text(String),

    /// Structured JSON payload.
    Json(Value),

    /// Binary payload; bypasses the wire format.
    Binary(Vec<u8>),

    /// A payload that must be acknowledged by the peer within `timeout`.
    Ackable {
        /// How long to wait for the matching `Ack`.
        timeout: Duration,
        /// The wrapped payload.
        inner: Box<OutMessage>,
    },
}

impl OutMessage {
    /// Creates a text message.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// Creates a JSON message.
    #[must_use]
    pub fn json(value: Value) -> Self {
        Self::Json(value)
    }

    /// Creates a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    /// Wraps a message so the send resolves only once the peer
    /// acknowledges it, or fails after `timeout`.
    #[must_use]
    pub fn ackable(timeout: Duration, inner: OutMessage) -> Self {
        Self::Ackable {
            timeout,
            inner: Box::new(inner),
        }
    }

    /// Returns true if this message demands an acknowledgement.
    #[must_use]
    pub fn is_ackable(&self) -> bool {
        matches!(self, Self::Ackable { .. })
    }

    /// The payload envelope for this message.
    ///
    /// Only text and JSON payloads have an envelope form: binary bypasses
    /// the text codec, and the ack wrapper is applied by the send path
    /// after an id is assigned.
    pub fn payload_envelope(&self) -> Result<Envelope, ClientError> {
        match self {
            Self::Text(s) => Ok(Envelope::text(s.clone())),
            Self::Json(v) => Ok(Envelope::Json { body: v.clone() }),
            Self::Binary(_) => Err(ClientError::serialization(
                "binary messages bypass the text wire format",
            )),
            Self::Ackable { .. } => Err(ClientError::serialization(
                "nested acknowledgement wrappers are not supported",
            )),
        }
    }
}
