//! Connection lifecycle state.

use serde::{Deserialize, Serialize};
use sirocco_core::throttle::Throttle;
use std::time::{Duration, Instant};

/// Lifecycle phase of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPhase {
    /// Never connected.
    Idle,
    /// TCP connect in progress.
    Connecting,
    /// Upgrade exchange in progress.
    Handshaking,
    /// Handshake complete; transport writable.
    Open,
    /// User-initiated close in progress.
    Closing,
    /// Connection over for this session (until the next `connect`).
    Closed,
    /// Waiting out a reconnect delay.
    Reconnecting,
}

impl ConnectionPhase {
    /// Returns true if the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if the connection is between attempts or mid-attempt.
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Handshaking | Self::Reconnecting)
    }

    /// Returns true if no attempt is underway or pending.
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// Single-writer bookkeeping for the connection state machine.
///
/// Owned by the supervisor task; the facade exposes read-only snapshots
/// through the shared lock.
#[derive(Debug)]
pub(crate) struct InternalState {
    /// Current lifecycle phase.
    pub phase: ConnectionPhase,
    /// User intent: a close is in progress; failures must not retry.
    pub is_closing: bool,
    /// The current disconnect belongs to a reconnect episode.
    pub is_reconnecting: bool,
    /// `Reconnecting` has been emitted for the current episode.
    pub reconnect_notified: bool,
    /// Position in the reconnect schedule.
    pub current_throttle: Throttle,
    /// Total connection attempts made by this client.
    pub connect_attempts: u32,
    /// Last inbound frame instant on the live link.
    pub last_read: Option<Instant>,
    /// Last outbound frame instant on the live link.
    pub last_write: Option<Instant>,
    /// Last ping emitted on the live link.
    pub last_ping: Option<Instant>,
}

impl InternalState {
    pub fn new(throttle: Throttle) -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            is_closing: false,
            is_reconnecting: false,
            reconnect_notified: false,
            current_throttle: throttle,
            connect_attempts: 0,
            last_read: None,
            last_write: None,
            last_ping: None,
        }
    }

    /// Enters Connecting: clears the close intent, counts the attempt.
    pub fn mark_connecting(&mut self) {
        self.phase = ConnectionPhase::Connecting;
        self.is_closing = false;
        self.connect_attempts = self.connect_attempts.saturating_add(1);
    }

    pub fn mark_handshaking(&mut self) {
        self.phase = ConnectionPhase::Handshaking;
    }

    /// Enters Open: resets the throttle to the configured schedule and
    /// ends any reconnect episode.
    pub fn mark_open(&mut self, schedule: &Throttle) {
        self.phase = ConnectionPhase::Open;
        self.current_throttle = schedule.clone();
        self.is_reconnecting = false;
        self.reconnect_notified = false;
        let now = Instant::now();
        self.last_read = Some(now);
        self.last_write = Some(now);
        self.last_ping = None;
    }

    /// Enters Reconnecting. Returns true if the `Reconnecting` event
    /// should be emitted (first retry of the episode).
    pub fn begin_reconnect(&mut self) -> bool {
        self.phase = ConnectionPhase::Reconnecting;
        self.is_reconnecting = true;
        if self.reconnect_notified {
            false
        } else {
            self.reconnect_notified = true;
            true
        }
    }

    pub fn mark_closing(&mut self) {
        self.phase = ConnectionPhase::Closing;
        self.is_closing = true;
    }

    pub fn mark_closed(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }

    /// Consumes one step of the reconnect schedule, returning its delay,
    /// or `None` when the schedule is exhausted.
    pub fn take_throttle_step(&mut self) -> Option<Duration> {
        let delay = self.current_throttle.delay();
        if delay.is_some() {
            self.current_throttle = self.current_throttle.next();
        }
        delay
    }

    pub fn record_read(&mut self) {
        self.last_read = Some(Instant::now());
    }

    pub fn record_write(&mut self) {
        self.last_write = Some(Instant::now());
    }

    pub fn record_ping(&mut self) {
        let now = Instant::now();
        self.last_ping = Some(now);
        self.last_write = Some(now);
    }

    /// Returns true when either direction has been idle at least `window`.
    pub fn is_idle(&self, window: Duration) -> bool {
        let now = Instant::now();
        let read_idle = self
            .last_read
            .map_or(true, |at| now.duration_since(at) >= window);
        let write_idle = self
            .last_write
            .map_or(true, |at| now.duration_since(at) >= window);
        read_idle || write_idle
    }
}
