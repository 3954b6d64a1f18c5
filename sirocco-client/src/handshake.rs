//! HTTP upgrade handshake.
//!
//! The [`HandshakeDriver`] owns one upgrade exchange per connection
//! attempt: it builds the upgrade request from the settings, and matches
//! the response once the transport layer has performed the exchange.
//! Completing the driver is the point where the connection pipeline
//! switches from HTTP to WebSocket framing — the supervisor only installs
//! the frame-mode stream after [`HandshakeDriver::complete`] succeeds.
//!
//! RFC 6455 (`V13`) key generation and `Sec-WebSocket-Accept` checking
//! are the frame codec's job; this driver layers the caller's headers and
//! the subprotocol offer on the request and verifies the negotiation
//! result. The legacy hixie-76 exchange (`V00`) — including the 16-byte
//! challenge body that follows the 101 response — is implemented in the
//! [`hixie`] submodule; connecting with `V00` still fails, because the
//! delegated frame codec only speaks RFC 6455 framing.

use crate::settings::{ConnectionSettings, ProtocolVersion};
use sirocco_core::error::ClientError;
use std::collections::HashMap;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, StatusCode};
use tracing::debug;

/// Progress of the upgrade exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No request built yet.
    NotStarted,
    /// Request handed to the transport.
    Sent,
    /// Response matched; the pipeline is in frame mode.
    Completed,
    /// The exchange failed; the attempt is over.
    Failed,
}

/// Drives one HTTP upgrade exchange.
#[derive(Debug)]
pub struct HandshakeDriver {
    url: String,
    version: ProtocolVersion,
    headers: HashMap<String, String>,
    protocols: Vec<String>,
    phase: HandshakePhase,
}

impl HandshakeDriver {
    /// Creates a driver for one connection attempt.
    #[must_use]
    pub fn new(settings: &ConnectionSettings) -> Self {
        Self {
            url: settings.url.clone(),
            version: settings.version,
            headers: settings.headers.clone(),
            protocols: settings.protocols.clone(),
            phase: HandshakePhase::NotStarted,
        }
    }

    /// Current phase of the exchange.
    #[must_use]
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Builds the upgrade request and transitions to `Sent`.
    pub fn upgrade_request(&mut self) -> Result<Request, ClientError> {
        if self.version == ProtocolVersion::V00 {
            self.phase = HandshakePhase::Failed;
            return Err(ClientError::handshake(
                "hixie-76 requires a draft-76 frame codec; only RFC 6455 framing is available",
            ));
        }

        match build_request(&self.url, &self.headers, &self.protocols) {
            Ok(request) => {
                self.phase = HandshakePhase::Sent;
                Ok(request)
            }
            Err(error) => {
                self.phase = HandshakePhase::Failed;
                Err(error)
            }
        }
    }

    /// Matches the upgrade response, transitioning to `Completed` and
    /// returning the negotiated subprotocol, if any.
    pub fn complete(&mut self, response: &Response) -> Result<Option<String>, ClientError> {
        match match_response(&self.protocols, response) {
            Ok(negotiated) => {
                self.phase = HandshakePhase::Completed;
                debug!(subprotocol = ?negotiated, "handshake completed");
                Ok(negotiated)
            }
            Err(error) => {
                self.phase = HandshakePhase::Failed;
                Err(error)
            }
        }
    }
}

fn build_request(
    url: &str,
    headers: &HashMap<String, String>,
    protocols: &[String],
) -> Result<Request, ClientError> {
    let mut request = url
        .into_client_request()
        .map_err(ClientError::handshake)?;

    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::handshake(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::handshake(format!("header {name}: {e}")))?;
        request.headers_mut().insert(header, value);
    }

    if !protocols.is_empty() {
        let offer = protocols.join(",");
        let value = HeaderValue::from_str(&offer)
            .map_err(|e| ClientError::handshake(format!("subprotocols: {e}")))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

fn match_response(
    protocols: &[String],
    response: &Response,
) -> Result<Option<String>, ClientError> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(ClientError::handshake(format!(
            "expected 101 Switching Protocols, got {}",
            response.status()
        )));
    }

    match response.headers().get(SEC_WEBSOCKET_PROTOCOL) {
        Some(value) => {
            let token = value
                .to_str()
                .map_err(|_| ClientError::handshake("non-ascii negotiated subprotocol"))?
                .to_string();
            if !protocols.iter().any(|offered| *offered == token) {
                return Err(ClientError::handshake(format!(
                    "server selected subprotocol {token:?} that was not offered"
                )));
            }
            Ok(Some(token))
        }
        None => Ok(None),
    }
}

/// Legacy hixie-76 (draft-76) handshake material.
///
/// The exchange differs from RFC 6455 in two ways the generic response
/// matching cannot discover on its own: the request carries two
/// space-and-digit keys plus an 8-byte body, and the 101 response is
/// always followed by a 16-byte challenge body that must equal the MD5 of
/// the decoded keys and the body.
pub mod hixie {
    use md5::{Digest, Md5};
    use rand::Rng;
    use sirocco_core::error::ClientError;

    /// Decodes a draft-76 key: the concatenated digits divided by the
    /// number of spaces.
    pub fn decode_key(key: &str) -> Result<u32, ClientError> {
        let digits: String = key.chars().filter(char::is_ascii_digit).collect();
        let spaces = key.chars().filter(|c| *c == ' ').count() as u64;
        if spaces == 0 {
            return Err(ClientError::handshake("draft-76 key contains no spaces"));
        }
        let number: u64 = digits
            .parse()
            .map_err(|_| ClientError::handshake("draft-76 key contains no digits"))?;
        if number % spaces != 0 {
            return Err(ClientError::handshake(
                "draft-76 key digits are not divisible by its spaces",
            ));
        }
        Ok((number / spaces) as u32)
    }

    /// Generates a draft-76 key and the number it encodes.
    pub fn generate_key<R: Rng>(rng: &mut R) -> (String, u32) {
        let spaces = rng.gen_range(1..=12u32);
        let number = rng.gen_range(0..=u32::MAX / spaces);
        let mut key = (number * spaces).to_string();

        // Interleave 1..=12 printable non-digit characters.
        for _ in 0..rng.gen_range(1..=12) {
            let position = rng.gen_range(0..=key.len());
            let ch = if rng.gen_bool(0.5) {
                char::from(rng.gen_range(0x21..=0x2Fu8))
            } else {
                char::from(rng.gen_range(0x3A..=0x7Eu8))
            };
            key.insert(position, ch);
        }

        // Spaces go strictly inside the key.
        for _ in 0..spaces {
            let position = rng.gen_range(1..key.len());
            key.insert(position, ' ');
        }

        (key, number)
    }

    /// Generates the 8 random bytes sent as the request body.
    pub fn generate_key3<R: Rng>(rng: &mut R) -> [u8; 8] {
        rng.gen()
    }

    /// The 16-byte challenge the server must answer with: MD5 over the
    /// big-endian key numbers and the request body.
    #[must_use]
    pub fn challenge(number1: u32, number2: u32, key3: &[u8; 8]) -> [u8; 16] {
        let mut hasher = Md5::new();
        hasher.update(number1.to_be_bytes());
        hasher.update(number2.to_be_bytes());
        hasher.update(key3);
        hasher.finalize().into()
    }

    /// Computes the expected challenge straight from the request keys.
    pub fn expected_challenge(
        key1: &str,
        key2: &str,
        key3: &[u8; 8],
    ) -> Result<[u8; 16], ClientError> {
        Ok(challenge(decode_key(key1)?, decode_key(key2)?, key3))
    }

    /// Verifies the 16-byte response body against the expected challenge.
    pub fn verify_challenge(expected: &[u8; 16], body: &[u8]) -> Result<(), ClientError> {
        if body.len() != 16 {
            return Err(ClientError::handshake(format!(
                "draft-76 challenge body must be 16 bytes, got {}",
                body.len()
            )));
        }
        if body != expected {
            return Err(ClientError::handshake(
                "draft-76 challenge response does not match",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ConnectionSettings;
    use tokio_tungstenite::tungstenite::http;

    fn driver(settings: &ConnectionSettings) -> HandshakeDriver {
        HandshakeDriver::new(settings)
    }

    fn response_builder() -> http::response::Builder {
        http::Response::builder().status(http::StatusCode::SWITCHING_PROTOCOLS)
    }

    #[test]
    fn test_request_carries_headers_and_offer() {
        let settings = ConnectionSettings::builder()
            .url("ws://example.com")
            .header("Authorization", "Bearer abc")
            .protocol("chat.v2")
            .protocol("chat.v1")
            .build();
        let mut driver = driver(&settings);
        assert_eq!(driver.phase(), HandshakePhase::NotStarted);

        let request = driver.upgrade_request().unwrap();
        assert_eq!(driver.phase(), HandshakePhase::Sent);
        assert_eq!(request.uri().path(), "/");
        assert_eq!(request.headers()["Authorization"], "Bearer abc");
        assert_eq!(request.headers()["Sec-WebSocket-Protocol"], "chat.v2,chat.v1");
    }

    #[test]
    fn test_no_offer_header_without_protocols() {
        let settings = ConnectionSettings::builder().url("ws://example.com").build();
        let request = driver(&settings).upgrade_request().unwrap();
        assert!(!request.headers().contains_key("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_complete_accepts_offered_subprotocol() {
        let settings = ConnectionSettings::builder()
            .url("ws://example.com")
            .protocol("chat.v1")
            .build();
        let mut driver = driver(&settings);
        driver.upgrade_request().unwrap();

        let response = response_builder()
            .header("Sec-WebSocket-Protocol", "chat.v1")
            .body(None)
            .unwrap();
        assert_eq!(
            driver.complete(&response).unwrap(),
            Some("chat.v1".to_string())
        );
        assert_eq!(driver.phase(), HandshakePhase::Completed);
    }

    #[test]
    fn test_complete_rejects_unoffered_subprotocol() {
        let settings = ConnectionSettings::builder()
            .url("ws://example.com")
            .protocol("chat.v1")
            .build();
        let mut driver = driver(&settings);
        driver.upgrade_request().unwrap();

        let response = response_builder()
            .header("Sec-WebSocket-Protocol", "other")
            .body(None)
            .unwrap();
        assert!(driver.complete(&response).is_err());
        assert_eq!(driver.phase(), HandshakePhase::Failed);
    }

    #[test]
    fn test_complete_rejects_non_101() {
        let settings = ConnectionSettings::builder().url("ws://example.com").build();
        let mut driver = driver(&settings);
        driver.upgrade_request().unwrap();

        let response = http::Response::builder()
            .status(http::StatusCode::FORBIDDEN)
            .body(None)
            .unwrap();
        assert!(driver.complete(&response).is_err());
        assert_eq!(driver.phase(), HandshakePhase::Failed);
    }

    #[test]
    fn test_v00_connect_is_rejected() {
        let settings = ConnectionSettings::builder()
            .url("ws://example.com")
            .version(ProtocolVersion::V00)
            .build();
        let mut driver = driver(&settings);
        let error = driver.upgrade_request().unwrap_err();
        assert!(error.to_string().contains("draft-76"));
        assert_eq!(driver.phase(), HandshakePhase::Failed);
    }

    mod hixie {
        use super::super::hixie;
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        #[test]
        fn test_draft_example_vector() {
            // The worked example from draft-hixie-thewebsocketprotocol-76.
            let key1 = "4 @1  46546xW%0l 1 5";
            let key2 = "12998 5 Y3 1  .P00";
            let key3: [u8; 8] = *b"^n:ds[4U";

            assert_eq!(hixie::decode_key(key1).unwrap(), 829_309_203);
            assert_eq!(hixie::decode_key(key2).unwrap(), 259_970_620);

            let expected = hixie::expected_challenge(key1, key2, &key3).unwrap();
            assert_eq!(&expected, b"8jKS'y:G*Co,Wxa-");
            hixie::verify_challenge(&expected, b"8jKS'y:G*Co,Wxa-").unwrap();
        }

        #[test]
        fn test_challenge_mismatch_rejected() {
            let expected = hixie::challenge(1, 2, b"abcdefgh");
            assert!(hixie::verify_challenge(&expected, b"0000000000000000").is_err());
            assert!(hixie::verify_challenge(&expected, b"short").is_err());
        }

        #[test]
        fn test_decode_rejects_malformed_keys() {
            assert!(hixie::decode_key("nospaces123").is_err());
            assert!(hixie::decode_key("   ").is_err());
            // 7 is not divisible by 2 spaces.
            assert!(hixie::decode_key("7 x ").is_err());
        }

        #[test]
        fn test_generated_keys_decode() {
            let mut rng = StdRng::seed_from_u64(0x5150);
            for _ in 0..64 {
                let (key, number) = hixie::generate_key(&mut rng);
                assert_eq!(hixie::decode_key(&key).unwrap(), number);
            }
        }
    }
}
