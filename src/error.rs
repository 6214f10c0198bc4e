//! Error types for rate-limit decisions
use std::fmt;

/// Unified error type for the decision core.
///
/// Errors are fatal to the single request only; no error path leaves the
/// cache in a corrupted state. Cache/store inconsistencies and store
/// failures are handled internally and never surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// `DURATION_IS_GREGORIAN` was set but `duration` is not one of the
    /// seven recognized calendar interval lengths.
    InvalidGregorianDuration {
        /// The rejected duration, in milliseconds.
        duration: i64,
    },
    /// The clock provider failed (e.g. system time before the UNIX epoch).
    Clock {
        /// Provider-supplied description of the failure.
        reason: String,
    },
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGregorianDuration { duration } => {
                write!(f, "{} is not a valid gregorian interval duration", duration)
            }
            Self::Clock { reason } => write!(f, "clock provider failed: {}", reason),
        }
    }
}

impl std::error::Error for RateLimitError {}

impl RateLimitError {
    /// Check if this error is a rejected gregorian duration.
    pub fn is_invalid_gregorian_duration(&self) -> bool {
        matches!(self, Self::InvalidGregorianDuration { .. })
    }

    /// Check if this error came from the clock provider.
    pub fn is_clock(&self) -> bool {
        matches!(self, Self::Clock { .. })
    }

    /// Access the rejected duration if this is an `InvalidGregorianDuration`.
    pub fn rejected_duration(&self) -> Option<i64> {
        match self {
            Self::InvalidGregorianDuration { duration } => Some(*duration),
            _ => None,
        }
    }
}
