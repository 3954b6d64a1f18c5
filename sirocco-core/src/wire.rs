//! Wire envelope and codec seam.
//!
//! Text frame payloads carry an ack-capable [`Envelope`]: plain text or
//! JSON application payloads, acknowledgement requests, and
//! acknowledgements. A [`WireFormat`] translates between envelopes and
//! text payloads; the default [`JsonWireFormat`] encodes envelopes as JSON
//! objects with a `"type"` discriminator. Binary frames bypass the codec
//! entirely.
//!
//! Parsing never fails: a payload the format cannot understand is
//! delivered as `Envelope::Text` with the raw payload, so a peer speaking
//! an unexpected dialect degrades the stream rather than killing the
//! transport.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An ack-capable text frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Plain text application payload.
    Text {
        /// The payload.
        body: String,
    },

    /// Structured JSON application payload.
    Json {
        /// The payload.
        body: Value,
    },

    /// Acknowledgement of a previously received `AckRequest`.
    Ack {
        /// Id of the acknowledged message.
        id: u64,
    },

    /// An application payload that must be acknowledged by the receiver.
    AckRequest {
        /// Id the acknowledgement must echo.
        id: u64,
        /// The wrapped payload.
        body: Box<Envelope>,
    },
}

impl Envelope {
    /// Creates a text envelope.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// Creates a JSON envelope.
    #[must_use]
    pub fn json(body: Value) -> Self {
        Self::Json { body }
    }

    /// Creates an acknowledgement envelope.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Self::Ack { id }
    }

    /// Wraps an envelope in an acknowledgement request.
    #[must_use]
    pub fn ack_request(id: u64, body: Envelope) -> Self {
        Self::AckRequest {
            id,
            body: Box::new(body),
        }
    }

    /// Returns true if this is an application payload (text or JSON).
    #[must_use]
    pub fn is_payload(&self) -> bool {
        matches!(self, Self::Text { .. } | Self::Json { .. })
    }
}

/// Codec between [`Envelope`]s and text frame payloads.
///
/// Implementations must satisfy the round-trip property
/// `parse_in_message(&render(x)?) == x` for every envelope `x`.
pub trait WireFormat: Send + Sync + fmt::Debug {
    /// Classifies a text frame payload.
    ///
    /// Never fails: payloads the format cannot parse are returned as
    /// `Envelope::Text` carrying the raw payload.
    fn parse_in_message(&self, text: &str) -> Envelope;

    /// Renders an envelope to a text frame payload.
    fn render(&self, envelope: &Envelope) -> Result<String, ClientError>;
}

/// The default wire format: JSON objects with a `"type"` discriminator.
///
/// ```
/// use sirocco_core::wire::{Envelope, JsonWireFormat, WireFormat};
///
/// let format = JsonWireFormat;
/// let rendered = format.render(&Envelope::ack(3)).unwrap();
/// assert_eq!(rendered, r#"{"type":"ack","id":3}"#);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWireFormat;

impl WireFormat for JsonWireFormat {
    fn parse_in_message(&self, text: &str) -> Envelope {
        serde_json::from_str(text).unwrap_or_else(|_| Envelope::text(text))
    }

    fn render(&self, envelope: &Envelope) -> Result<String, ClientError> {
        serde_json::to_string(envelope).map_err(|e| ClientError::Serialization {
            reason: format!("failed to render envelope: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_all_variants() {
        let format = JsonWireFormat;
        let envelopes = vec![
            Envelope::text("hello"),
            Envelope::json(json!({"k": [1, 2, 3]})),
            Envelope::ack(42),
            Envelope::ack_request(7, Envelope::text("payload")),
            Envelope::ack_request(8, Envelope::json(json!(99))),
        ];
        for envelope in envelopes {
            let rendered = format.render(&envelope).unwrap();
            assert_eq!(format.parse_in_message(&rendered), envelope);
        }
    }

    #[test]
    fn test_discriminator_field() {
        let format = JsonWireFormat;
        let rendered = format
            .render(&Envelope::ack_request(1, Envelope::text("x")))
            .unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["type"], "ack_request");
        assert_eq!(value["body"]["type"], "text");
    }

    #[test]
    fn test_unparseable_falls_back_to_text() {
        let format = JsonWireFormat;
        assert_eq!(
            format.parse_in_message("not json at all"),
            Envelope::text("not json at all")
        );
        // Valid JSON without the discriminator is still not an envelope.
        assert_eq!(
            format.parse_in_message(r#"{"foo": 1}"#),
            Envelope::text(r#"{"foo": 1}"#)
        );
    }

    #[test]
    fn test_is_payload() {
        assert!(Envelope::text("x").is_payload());
        assert!(Envelope::json(json!(null)).is_payload());
        assert!(!Envelope::ack(1).is_payload());
        assert!(!Envelope::ack_request(1, Envelope::text("x")).is_payload());
    }
}
