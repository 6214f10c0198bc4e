//! Clock abstractions used by the decision engines and the calendar resolver.

use crate::error::RateLimitError;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Thread-safe wall-clock time source.
///
/// The return value is milliseconds since the UNIX epoch, interpreted as UTC
/// civil time by the calendar resolver. Calls must be safe concurrently
/// (`Send + Sync`). Every decision reads the clock exactly once, so a
/// provider failure fails that single request and nothing else.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time in milliseconds since the UNIX epoch.
    fn now_millis(&self) -> Result<i64, RateLimitError>;
}

/// Production clock backed by `SystemTime::now()`.
///
/// Fails only when system time reads before the UNIX epoch, which surfaces
/// as [`RateLimitError::Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> Result<i64, RateLimitError> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RateLimitError::Clock { reason: e.to_string() })?;
        i64::try_from(since_epoch.as_millis())
            .map_err(|_| RateLimitError::Clock { reason: "timestamp overflows i64".into() })
    }
}

/// Test clock that only moves when told to.
///
/// Clones share the same underlying instant, so a test can hand one copy to
/// the limiter and keep another to advance time between requests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a manual clock starting at `start_millis`.
    pub fn new(start_millis: i64) -> Self {
        Self { now: Arc::new(AtomicI64::new(start_millis)) }
    }

    /// Move the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Result<i64, RateLimitError> {
        Ok(self.now.load(Ordering::SeqCst))
    }
}
