//! Operation outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolution value of client operations.
///
/// A `Cancelled` completion is not a failure: it reports that the
/// operation ended without its effect because the session was torn down
/// first — a reconnect schedule ran out, a pending reconnect delay was
/// pre-empted by `disconnect`, or an ack timer fired. Hard failures travel
/// as `Err(ClientError)` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Completion {
    /// The operation took effect.
    Success,
    /// The operation was abandoned before taking effect.
    Cancelled,
}

impl Completion {
    /// Returns true if the operation took effect.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the operation was abandoned.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}
