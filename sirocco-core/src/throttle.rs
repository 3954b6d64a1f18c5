//! Reconnect schedule.
//!
//! A [`Throttle`] is a lazy sequence of delays: each position yields the
//! delay before the next connection attempt, and [`Throttle::next`]
//! returns the successor position. A terminal position ([`Throttle::delay`]
//! returning `None`) is the cancel signal that stops automatic
//! reconnection. The connection state machine holds the current position
//! and consumes one step per failed attempt, resetting to the configured
//! schedule whenever a connection opens.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A reconnect schedule position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Throttle {
    /// Terminal immediately; automatic reconnection is disabled.
    None,

    /// The same delay at every step, optionally bounded in retries.
    Fixed {
        /// Delay before each attempt.
        delay: Duration,
        /// Remaining retries; `None` means indefinite.
        remaining: Option<u32>,
    },

    /// Exponentially growing delay with a cap, optionally bounded in retries.
    Exponential {
        /// Delay at the current position.
        delay: Duration,
        /// Upper bound for the delay.
        max_delay: Duration,
        /// Growth factor applied per step.
        multiplier: f64,
        /// Remaining retries; `None` means indefinite.
        remaining: Option<u32>,
    },

    /// An explicit finite list of delays; terminal once exhausted.
    Schedule {
        /// Remaining delays, consumed front to back.
        delays: Vec<Duration>,
    },
}

impl Throttle {
    /// A schedule that never reconnects.
    #[must_use]
    pub fn none() -> Self {
        Self::None
    }

    /// The same delay before every attempt, indefinitely.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay,
            remaining: None,
        }
    }

    /// The same delay before every attempt, at most `retries` times.
    #[must_use]
    pub fn fixed_bounded(delay: Duration, retries: u32) -> Self {
        Self::Fixed {
            delay,
            remaining: Some(retries),
        }
    }

    /// Exponential backoff from `initial` capped at `max`, indefinitely.
    #[must_use]
    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self::Exponential {
            delay: initial,
            max_delay: max,
            multiplier,
            remaining: None,
        }
    }

    /// Exponential backoff bounded at `retries` attempts.
    #[must_use]
    pub fn exponential_bounded(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        retries: u32,
    ) -> Self {
        Self::Exponential {
            delay: initial,
            max_delay: max,
            multiplier,
            remaining: Some(retries),
        }
    }

    /// An explicit list of delays, terminal once exhausted.
    #[must_use]
    pub fn schedule(delays: Vec<Duration>) -> Self {
        Self::Schedule { delays }
    }

    /// The delay at this position, or `None` when terminal.
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { delay, remaining } => match remaining {
                Some(0) => None,
                _ => Some(*delay),
            },
            Self::Exponential {
                delay, remaining, ..
            } => match remaining {
                Some(0) => None,
                _ => Some(*delay),
            },
            Self::Schedule { delays } => delays.first().copied(),
        }
    }

    /// Returns true if this position is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.delay().is_none()
    }

    /// The successor position.
    #[must_use]
    pub fn next(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Fixed { delay, remaining } => Self::Fixed {
                delay: *delay,
                remaining: remaining.map(|r| r.saturating_sub(1)),
            },
            Self::Exponential {
                delay,
                max_delay,
                multiplier,
                remaining,
            } => Self::Exponential {
                delay: delay.mul_f64(*multiplier).min(*max_delay),
                max_delay: *max_delay,
                multiplier: *multiplier,
                remaining: remaining.map(|r| r.saturating_sub(1)),
            },
            Self::Schedule { delays } => Self::Schedule {
                delays: delays.iter().skip(1).copied().collect(),
            },
        }
    }
}

impl Default for Throttle {
    /// Indefinite exponential backoff, 1 s doubling up to 60 s.
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}
