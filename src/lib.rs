#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Floodgate
//!
//! The decision core of a distributed rate-limiting service: given a
//! request naming a key and declaring its policy, decide UNDER or OVER the
//! limit, update the key's accounting state, and report the remaining
//! allowance and the moment of reset.
//!
//! ## Features
//!
//! - **Two algorithms**: fixed-window [token buckets](Algorithm::TokenBucket)
//!   and continuously-leaking [leaky buckets](Algorithm::LeakyBucket)
//! - **Policy travels with the request**: limits, durations, and bursts can
//!   change mid-life without losing or fabricating allowance
//! - **Calendar-aligned windows** via [`Behavior::DURATION_IS_GREGORIAN`]
//!   (end of second/minute/hour/day/week/month/year, UTC)
//! - **Two-tier persistence**: an in-memory [`Cache`] backed by an optional
//!   durable [`Store`] synchronized by write-through, never on the decision
//!   path
//! - **Per-key serialization** with sharded locks; distinct keys stay
//!   parallel
//! - **Injectable clock** for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust
//! use floodgate::{Algorithm, RateLimitReq, RateLimiter, Status};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), floodgate::RateLimitError> {
//!     let limiter = RateLimiter::builder().build();
//!
//!     let req = RateLimitReq {
//!         key: "tenant_a:send_email".into(),
//!         algorithm: Algorithm::TokenBucket,
//!         limit: 100,
//!         duration: 60_000,
//!         hits: 1,
//!         ..Default::default()
//!     };
//!
//!     let resp = limiter.decide(&req).await?;
//!     assert_eq!(resp.status, Status::UnderLimit);
//!     assert_eq!(resp.remaining, 99);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod error;
pub mod gregorian;
mod leaky_bucket;
pub mod limiter;
pub mod store;
mod token_bucket;
pub mod types;

// Re-exports
pub use cache::{BucketValue, Cache, CacheItem, InMemoryCache, LeakyBucketItem, TokenBucketItem};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::RateLimitError;
pub use gregorian::{
    gregorian_duration, gregorian_expiration, GREGORIAN_DAY, GREGORIAN_HOUR, GREGORIAN_MINUTE,
    GREGORIAN_MONTH, GREGORIAN_SECOND, GREGORIAN_WEEK, GREGORIAN_YEAR,
};
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use store::{MemoryStore, Store, StoreError};
pub use types::{Algorithm, Behavior, RateLimitReq, RateLimitResp, Status};
