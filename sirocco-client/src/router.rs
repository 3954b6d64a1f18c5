//! Inbound frame routing.
//!
//! [`route`] classifies one decoded frame into the action the link task
//! must take. Keeping the dispatch pure keeps it testable without a
//! transport: the link task owns the side effects (registry calls, pong
//! writes, event delivery).

use crate::message::InMessage;
use sirocco_core::wire::{Envelope, WireFormat};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::warn;

/// Action demanded by one inbound frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Verdict {
    /// Deliver to the application stream.
    Deliver(InMessage),
    /// An acknowledgement for one of our ack-wrapped sends.
    AckInbound(u64),
    /// The peer wants `inner` delivered and `Ack { id }` echoed back.
    AckRequest {
        /// Id to echo.
        id: u64,
        /// Payload to deliver.
        inner: InMessage,
    },
    /// Reply with a pong carrying the same payload.
    Pong(Vec<u8>),
    /// A pong arrived; record liveness, deliver nothing.
    PongReceived,
    /// The peer initiated a close.
    PeerClose(Option<String>),
    /// Frame consumed with no action.
    Drop,
}

/// Classifies one decoded frame.
pub(crate) fn route(message: Message, wire: &dyn WireFormat) -> Verdict {
    match message {
        Message::Text(text) => match wire.parse_in_message(&text) {
            Envelope::Ack { id } => Verdict::AckInbound(id),
            Envelope::AckRequest { id, body } => match InMessage::from_payload(*body) {
                Some(inner) => Verdict::AckRequest { id, inner },
                None => {
                    warn!(id, "dropping ack request whose body is not a payload");
                    Verdict::Drop
                }
            },
            payload => match InMessage::from_payload(payload) {
                Some(message) => Verdict::Deliver(message),
                None => Verdict::Drop,
            },
        },
        Message::Binary(data) => Verdict::Deliver(InMessage::Binary(data)),
        Message::Ping(data) => Verdict::Pong(data),
        Message::Pong(_) => Verdict::PongReceived,
        Message::Close(frame) => Verdict::PeerClose(
            frame
                .map(|f| f.reason.into_owned())
                .filter(|reason| !reason.is_empty()),
        ),
        // Fragmented messages are not reassembled in this release.
        Message::Frame(_) => {
            warn!("dropping raw frame; continuation frames are not supported");
            Verdict::Drop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirocco_core::wire::JsonWireFormat;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    fn route_text(text: &str) -> Verdict {
        route(Message::Text(text.to_string()), &JsonWireFormat)
    }

    #[test]
    fn test_payload_envelopes_deliver() {
        assert_eq!(
            route_text(r#"{"type":"text","body":"hi"}"#),
            Verdict::Deliver(InMessage::Text("hi".into()))
        );
        assert_eq!(
            route_text(r#"{"type":"json","body":{"n":1}}"#),
            Verdict::Deliver(InMessage::Json(serde_json::json!({"n": 1})))
        );
    }

    #[test]
    fn test_unparseable_text_delivers_raw() {
        assert_eq!(
            route_text("plain words"),
            Verdict::Deliver(InMessage::Text("plain words".into()))
        );
    }

    #[test]
    fn test_ack_goes_to_registry() {
        assert_eq!(route_text(r#"{"type":"ack","id":9}"#), Verdict::AckInbound(9));
    }

    #[test]
    fn test_ack_request_unwraps_inner() {
        assert_eq!(
            route_text(r#"{"type":"ack_request","id":4,"body":{"type":"text","body":"p"}}"#),
            Verdict::AckRequest {
                id: 4,
                inner: InMessage::Text("p".into()),
            }
        );
    }

    #[test]
    fn test_ack_request_with_ack_body_dropped() {
        assert_eq!(
            route_text(r#"{"type":"ack_request","id":4,"body":{"type":"ack","id":1}}"#),
            Verdict::Drop
        );
    }

    #[test]
    fn test_binary_delivers() {
        assert_eq!(
            route(Message::Binary(vec![1, 2]), &JsonWireFormat),
            Verdict::Deliver(InMessage::Binary(vec![1, 2]))
        );
    }

    #[test]
    fn test_ping_demands_pong() {
        assert_eq!(
            route(Message::Ping(vec![7]), &JsonWireFormat),
            Verdict::Pong(vec![7])
        );
    }

    #[test]
    fn test_pong_recorded_silently() {
        assert_eq!(
            route(Message::Pong(vec![]), &JsonWireFormat),
            Verdict::PongReceived
        );
    }

    #[test]
    fn test_close_frames() {
        assert_eq!(
            route(Message::Close(None), &JsonWireFormat),
            Verdict::PeerClose(None)
        );
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        };
        assert_eq!(
            route(Message::Close(Some(frame)), &JsonWireFormat),
            Verdict::PeerClose(Some("maintenance".into()))
        );
    }
}
