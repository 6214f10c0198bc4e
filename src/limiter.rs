//! The rate limiter: algorithm dispatch, cache/store coordination, and
//! per-key serialization.
//!
//! [`RateLimiter::decide`] is the single entry point. Each call runs under a
//! sharded per-key lock so concurrent requests on one key observe a total
//! order, while requests on distinct keys proceed in parallel with
//! contention bounded by the shard count, not the key count. Store
//! write-through happens after the lock is released; the store is never on
//! the decision path, so its failures are logged and the cache decision
//! stands.

use crate::cache::{Cache, InMemoryCache};
use crate::clock::{Clock, SystemClock};
use crate::error::RateLimitError;
use crate::store::{Store, StoreEffect};
use crate::types::{Algorithm, RateLimitReq, RateLimitResp};
use crate::{leaky_bucket, token_bucket};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_LOCK_SHARDS: usize = 64;

/// Fixed pool of mutexes selected by key hash. Holding a shard serializes
/// every key that hashes into it; the pool size bounds contention
/// independently of how many keys are live.
#[derive(Debug)]
struct KeyLocks {
    shards: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self { shards: (0..shards).map(|_| Mutex::new(())).collect() }
    }

    async fn lock(&self, key: &str) -> tokio::sync::MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        self.shards[idx].lock().await
    }
}

/// The rate-limit decision core.
///
/// Holds the cache, the optional durable store, and the clock; dispatches
/// each request to its algorithm engine.
///
/// ```
/// use floodgate::{Algorithm, RateLimitReq, RateLimiter, Status};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), floodgate::RateLimitError> {
/// let limiter = RateLimiter::builder().build();
///
/// let resp = limiter
///     .decide(&RateLimitReq {
///         key: "tenant_a:login".into(),
///         algorithm: Algorithm::TokenBucket,
///         limit: 100,
///         duration: 60_000,
///         hits: 1,
///         ..Default::default()
///     })
///     .await?;
///
/// assert_eq!(resp.status, Status::UnderLimit);
/// assert_eq!(resp.remaining, 99);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    store: Option<Arc<dyn Store>>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyLocks>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store.is_some())
            .field("lock_shards", &self.locks.shards.len())
            .finish()
    }
}

impl RateLimiter {
    /// Start building a limiter.
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    /// Decide whether `req` is under or over its limit, updating the key's
    /// accounting state.
    ///
    /// Errors surface only for a rejected Gregorian duration or a clock
    /// failure, and are fatal to this request alone.
    pub async fn decide(&self, req: &RateLimitReq) -> Result<RateLimitResp, RateLimitError> {
        let guard = self.locks.lock(&req.key).await;
        let now = self.clock.now_millis()?;

        let mut item = self.cache.get_item(&req.key);

        // Cache miss: fall back to the store, installing a hit so the next
        // request is served from cache. A store failure reads as a miss.
        if item.is_none() {
            if let Some(store) = &self.store {
                match store.get(req).await {
                    Ok(Some(found)) => {
                        self.cache.add(found.clone());
                        item = Some(found);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(key = %req.key, error = %err, "store lookup failed; treating as miss");
                    }
                }
            }
        }

        // Sanity check: an item filed under the wrong key is corrupt.
        // Proceed as if it never existed.
        if let Some(ref found) = item {
            if found.key != req.key {
                tracing::error!(key = %req.key, item_key = %found.key, "invalid cache item: key mismatch");
                item = None;
            }
        }

        // Algorithm switch: the stored shape no longer matches the request.
        // Evict both copies and start fresh with the requested engine.
        let mut evicted = false;
        if let Some(ref found) = item {
            if found.algorithm() != req.algorithm {
                tracing::debug!(key = %req.key, "algorithm changed; discarding previous bucket");
                self.cache.remove(&req.key);
                evicted = true;
                item = None;
            }
        }

        let (resp, effect) = match req.algorithm {
            Algorithm::TokenBucket => token_bucket::decide(self.cache.as_ref(), now, item, req)?,
            Algorithm::LeakyBucket => leaky_bucket::decide(self.cache.as_ref(), now, item, req)?,
        };

        // Write-through runs outside the per-key lock: the response is
        // already computed, and a slow store must not serialize other
        // callers of this key.
        drop(guard);
        if let Some(store) = &self.store {
            if evicted {
                if let Err(err) = store.remove(&req.key).await {
                    tracing::warn!(key = %req.key, error = %err, "store remove failed");
                }
            }
            match effect {
                StoreEffect::None => {}
                StoreEffect::Write(item) => {
                    if let Err(err) = store.on_change(req, item).await {
                        tracing::warn!(key = %req.key, error = %err, "store write-through failed");
                    }
                }
                StoreEffect::Remove => {
                    if let Err(err) = store.remove(&req.key).await {
                        tracing::warn!(key = %req.key, error = %err, "store remove failed");
                    }
                }
            }
        }

        Ok(resp)
    }
}

/// Builder for [`RateLimiter`].
///
/// Defaults: [`SystemClock`], an [`InMemoryCache`] sharing that clock, no
/// store, 64 lock shards.
pub struct RateLimiterBuilder {
    cache: Option<Arc<dyn Cache>>,
    store: Option<Arc<dyn Store>>,
    clock: Arc<dyn Clock>,
    lock_shards: usize,
}

impl RateLimiterBuilder {
    fn new() -> Self {
        Self {
            cache: None,
            store: None,
            clock: Arc::new(SystemClock::new()),
            lock_shards: DEFAULT_LOCK_SHARDS,
        }
    }

    /// Use `cache` instead of a fresh [`InMemoryCache`].
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Mirror state changes into `store` and consult it on cache misses.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Read time from `clock`. When the default cache is used it shares
    /// this clock, so injected test time drives expiry too.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Size of the per-key lock pool. Clamped to at least 1.
    pub fn lock_shards(mut self, shards: usize) -> Self {
        self.lock_shards = shards;
        self
    }

    /// Build the limiter.
    pub fn build(self) -> RateLimiter {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new(self.clock.clone())));
        RateLimiter {
            cache,
            store: self.store,
            clock: self.clock,
            locks: Arc::new(KeyLocks::new(self.lock_shards)),
        }
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
