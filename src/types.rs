//! Request and response types for rate-limit decisions.

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// The accounting algorithm a request selects for its key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Fixed-window allowance that resets when the window expires.
    #[default]
    TokenBucket,
    /// Continuous-leak allowance with a burst cap.
    LeakyBucket,
}

/// Whether the request was under or over the limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// The request fits inside the allowance.
    #[default]
    UnderLimit,
    /// The request was rejected by the limit.
    OverLimit,
}

/// Bit set of per-request behavior flags.
///
/// Flags compose with `|`:
///
/// ```
/// use floodgate::Behavior;
///
/// let b = Behavior::RESET_REMAINING | Behavior::DURATION_IS_GREGORIAN;
/// assert!(b.contains(Behavior::RESET_REMAINING));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behavior(u32);

impl Behavior {
    /// No flags set.
    pub const NONE: Behavior = Behavior(0);
    /// Drop the stored state for the key and answer with the full allowance.
    pub const RESET_REMAINING: Behavior = Behavior(1);
    /// Align the window to a calendar interval instead of a rolling duration.
    pub const DURATION_IS_GREGORIAN: Behavior = Behavior(1 << 1);

    /// Check whether every flag in `other` is set in `self`.
    pub fn contains(self, other: Behavior) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Behavior {
    type Output = Behavior;

    fn bitor(self, rhs: Behavior) -> Behavior {
        Behavior(self.0 | rhs.0)
    }
}

impl BitOrAssign for Behavior {
    fn bitor_assign(&mut self, rhs: Behavior) {
        self.0 |= rhs.0;
    }
}

/// A single rate-limit request. Immutable within a decision.
///
/// `key` is the opaque identity of the limited subject; callers typically
/// build it from a namespace and a unique key. The policy (`algorithm`,
/// `limit`, `duration`, `burst`, `behavior`) travels on every request, so a
/// caller can change policy mid-life and the engines reconcile the stored
/// state with the new parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitReq {
    /// Opaque identity of the limited subject.
    pub key: String,
    /// Which accounting algorithm to apply.
    pub algorithm: Algorithm,
    /// Allowance per window (token bucket) or units leaked per `duration`
    /// (leaky bucket). Positive.
    pub limit: i64,
    /// Window size (token bucket) or leak timescale (leaky bucket), in
    /// milliseconds. Positive.
    pub duration: i64,
    /// Units this request wishes to consume; `0` inspects without consuming.
    pub hits: i64,
    /// Leaky-bucket cap. `0` means "equals `limit`". Ignored by the token
    /// bucket.
    pub burst: i64,
    /// Behavior flags for this request.
    pub behavior: Behavior,
}

/// The answer to a rate-limit request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResp {
    /// Whether the request was under or over the limit.
    pub status: Status,
    /// Echo of the request limit.
    pub limit: i64,
    /// Allowance left after this call.
    pub remaining: i64,
    /// Absolute milliseconds since the epoch when the allowance is next
    /// expected to be at least 1 under current parameters; `0` when reset
    /// semantics do not apply (e.g. right after `RESET_REMAINING`).
    pub reset_time: i64,
}
