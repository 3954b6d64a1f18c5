//! Client connection settings.

use crate::buffer::BackupBuffer;
use serde::{Deserialize, Serialize};
use sirocco_core::throttle::Throttle;
use sirocco_core::wire::{JsonWireFormat, WireFormat};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// WebSocket protocol version used for the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Legacy hixie-76 (draft-76) handshake.
    V00,
    /// RFC 6455.
    #[default]
    V13,
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V00 => write!(f, "hixie-76"),
            Self::V13 => write!(f, "13"),
        }
    }
}

/// Configuration for a [`WebSocketClient`](crate::WebSocketClient).
///
/// Immutable once built. Timings are stored in milliseconds with
/// `Duration` accessors; the reconnect schedule, the offline buffer, and
/// the wire format plug in here.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Endpoint URL; normalized at build (an empty path becomes `/`).
    pub url: String,

    /// Protocol version for the upgrade handshake.
    pub version: ProtocolVersion,

    /// Headers included verbatim in the upgrade request.
    pub headers: HashMap<String, String>,

    /// Subprotocol tokens offered during negotiation; empty means none.
    pub protocols: Vec<String>,

    /// Idle duration after which a ping is emitted, in milliseconds.
    pub ping_interval_ms: u64,

    /// Wall-clock bound for TCP connect plus handshake, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Bound for `close()`, in milliseconds.
    pub close_timeout_ms: u64,

    /// Reconnect schedule; [`Throttle::None`] disables automatic reconnect.
    pub throttle: Throttle,

    /// Buffer for messages sent while disconnected; absent means such
    /// messages are dropped (and logged).
    pub buffer: Option<Arc<dyn BackupBuffer>>,

    /// Codec for text frame payloads.
    pub wire_format: Arc<dyn WireFormat>,
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_close_timeout_ms() -> u64 {
    30_000
}

/// Rewrites an empty path to `/`, leaving unparseable input untouched
/// (the connect path reports those properly).
fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_string(),
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            version: ProtocolVersion::default(),
            headers: HashMap::new(),
            protocols: Vec::new(),
            ping_interval_ms: default_ping_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            throttle: Throttle::default(),
            buffer: None,
            wire_format: Arc::new(JsonWireFormat),
        }
    }
}

impl ConnectionSettings {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder::default()
    }

    /// Returns the idle ping interval as a `Duration`.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Returns the connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the close timeout as a `Duration`.
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// The subprotocol offer, comma-joined, or `None` when empty.
    #[must_use]
    pub fn protocol_offer(&self) -> Option<String> {
        if self.protocols.is_empty() {
            None
        } else {
            Some(self.protocols.join(","))
        }
    }
}

/// Builder for [`ConnectionSettings`].
#[derive(Debug, Default)]
pub struct ConnectionSettingsBuilder {
    url: Option<String>,
    version: Option<ProtocolVersion>,
    headers: HashMap<String, String>,
    protocols: Vec<String>,
    ping_interval_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    close_timeout_ms: Option<u64>,
    throttle: Option<Throttle>,
    buffer: Option<Arc<dyn BackupBuffer>>,
    wire_format: Option<Arc<dyn WireFormat>>,
}

impl ConnectionSettingsBuilder {
    /// Sets the endpoint URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the protocol version.
    #[must_use]
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Adds a header to the upgrade request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Offers a subprotocol; may be called repeatedly, order preserved.
    #[must_use]
    pub fn protocol(mut self, token: impl Into<String>) -> Self {
        self.protocols.push(token.into());
        self
    }

    /// Sets the idle duration after which a ping is emitted.
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Sets the per-attempt connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Sets the bound on `close()`.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Sets the reconnect schedule.
    #[must_use]
    pub fn throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Installs a backup buffer for messages sent while disconnected.
    #[must_use]
    pub fn buffer(mut self, buffer: Arc<dyn BackupBuffer>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Installs a wire format other than the JSON default.
    #[must_use]
    pub fn wire_format(mut self, format: Arc<dyn WireFormat>) -> Self {
        self.wire_format = Some(format);
        self
    }

    /// Builds the settings, normalizing the URL.
    #[must_use]
    pub fn build(self) -> ConnectionSettings {
        ConnectionSettings {
            url: normalize_url(&self.url.unwrap_or_default()),
            version: self.version.unwrap_or_default(),
            headers: self.headers,
            protocols: self.protocols,
            ping_interval_ms: self.ping_interval_ms.unwrap_or_else(default_ping_interval_ms),
            connect_timeout_ms: self
                .connect_timeout_ms
                .unwrap_or_else(default_connect_timeout_ms),
            close_timeout_ms: self
                .close_timeout_ms
                .unwrap_or_else(default_close_timeout_ms),
            throttle: self.throttle.unwrap_or_default(),
            buffer: self.buffer,
            wire_format: self
                .wire_format
                .unwrap_or_else(|| Arc::new(JsonWireFormat)),
        }
    }
}
