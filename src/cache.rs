//! Cache capability and the per-key accounting state it holds.
//!
//! The decision core owns a cache slot per key. Each slot carries a tagged
//! payload, one of the two bucket shapes, plus an absolute expiry
//! deadline. Reads past the deadline behave as a miss, which is how token
//! windows turn over: the expired item vanishes and the next request builds
//! a fresh one.

use crate::clock::Clock;
use crate::types::{Algorithm, Status};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Accounting state for one token-bucket key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketItem {
    /// Last-observed allowance per window.
    pub limit: i64,
    /// Last-observed window size in milliseconds.
    pub duration: i64,
    /// Allowance left in the current window. Never negative.
    pub remaining: i64,
    /// Window start, milliseconds since the epoch.
    pub created_at: i64,
    /// Last-returned status. Once the window is exhausted this stays
    /// `OverLimit` so repeated inspection answers without recomputation.
    pub status: Status,
}

/// Accounting state for one leaky-bucket key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeakyBucketItem {
    /// Maximum stored allowance.
    pub burst: i64,
    /// Units that drip back per `duration`.
    pub limit: i64,
    /// Leak timescale in milliseconds.
    pub duration: i64,
    /// Current fill in units. Fractional so sub-unit leak accumulates;
    /// observers only ever see the floor. `0.0 <= remaining <= burst` after
    /// every update.
    pub remaining: f64,
    /// Instant of the last applied leak, milliseconds since the epoch.
    pub updated_at: i64,
}

/// Tagged payload of a cache slot. The variant is the algorithm tag; a
/// request for the other algorithm is a structural mismatch, handled by
/// eviction rather than reinterpretation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BucketValue {
    /// Token-bucket state.
    TokenBucket(TokenBucketItem),
    /// Leaky-bucket state.
    LeakyBucket(LeakyBucketItem),
}

impl BucketValue {
    /// The algorithm this payload belongs to.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            BucketValue::TokenBucket(_) => Algorithm::TokenBucket,
            BucketValue::LeakyBucket(_) => Algorithm::LeakyBucket,
        }
    }
}

/// One cache slot: the key it is stored under, its expiry deadline, and the
/// bucket state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    /// Echo of the key this item is stored under.
    pub key: String,
    /// Absolute millisecond deadline after which the item is absent.
    pub expire_at: i64,
    /// The bucket state.
    pub value: BucketValue,
}

impl CacheItem {
    /// The algorithm tag of the payload.
    pub fn algorithm(&self) -> Algorithm {
        self.value.algorithm()
    }
}

/// Cache capability consumed by the decision core.
///
/// Expected O(1) lookups. The eviction policy beyond expiry is the
/// implementation's business; the core only requires that expired items
/// read as absent.
pub trait Cache: Send + Sync {
    /// Fetch the item under `key`, or `None` if absent or expired.
    fn get_item(&self, key: &str) -> Option<CacheItem>;

    /// Insert `item` under its key, replacing any prior item.
    fn add(&self, item: CacheItem);

    /// Drop the item under `key`, if any.
    fn remove(&self, key: &str);

    /// Adjust the expiry deadline of the item under `key` without touching
    /// its value.
    fn update_expiration(&self, key: &str, expire_at: i64);
}

/// Mutex-guarded map cache.
///
/// Reads check `expire_at` against the injected clock, so the same clock
/// must drive both the limiter and its cache for windows to turn over
/// consistently. Expired entries are dropped lazily on read.
#[derive(Debug, Clone)]
pub struct InMemoryCache {
    clock: Arc<dyn Clock>,
    items: Arc<Mutex<HashMap<String, CacheItem>>>,
}

impl InMemoryCache {
    /// Create an empty cache reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, items: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Number of live (unexpired) items. Counts without evicting.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis().unwrap_or(i64::MAX);
        let guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
        guard.values().filter(|item| item.expire_at > now).count()
    }

    /// Check whether no live items remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for InMemoryCache {
    fn get_item(&self, key: &str) -> Option<CacheItem> {
        // A clock failure here poisons only this read; treating it as "all
        // expired" keeps the decision path on its fresh-item branch.
        let now = self.clock.now_millis().unwrap_or(i64::MAX);
        let mut guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get(key) {
            Some(item) if item.expire_at > now => Some(item.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    fn add(&self, item: CacheItem) {
        let mut guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(item.key.clone(), item);
    }

    fn remove(&self, key: &str) {
        let mut guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
    }

    fn update_expiration(&self, key: &str, expire_at: i64) {
        let mut guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = guard.get_mut(key) {
            item.expire_at = expire_at;
        }
    }
}
