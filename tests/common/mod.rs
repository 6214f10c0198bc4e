//! Shared fixtures for the integration suite.
#![allow(dead_code)] // each test binary uses a different slice of these

use async_trait::async_trait;
use floodgate::{
    Algorithm, CacheItem, Clock, InMemoryCache, ManualClock, RateLimitReq, RateLimiter, Store,
    StoreError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A limiter driven by a manual clock, plus the handles tests poke at.
pub struct Harness {
    pub clock: ManualClock,
    pub cache: Arc<InMemoryCache>,
    pub limiter: RateLimiter,
}

/// 2019-06-15T10:20:30.400Z, a Saturday, so weekly alignment is exercised
/// near its boundary.
pub const START: i64 = 1_560_594_030_400;

pub fn harness() -> Harness {
    let clock = ManualClock::new(START);
    let cache = Arc::new(InMemoryCache::new(Arc::new(clock.clone())));
    let limiter = RateLimiter::builder()
        .clock(Arc::new(clock.clone()))
        .cache(cache.clone())
        .build();
    Harness { clock, cache, limiter }
}

pub fn harness_with_store(store: Arc<dyn Store>) -> Harness {
    let clock = ManualClock::new(START);
    let cache = Arc::new(InMemoryCache::new(Arc::new(clock.clone())));
    let limiter = RateLimiter::builder()
        .clock(Arc::new(clock.clone()))
        .cache(cache.clone())
        .store(store)
        .build();
    Harness { clock, cache, limiter }
}

pub fn token_req(key: &str, limit: i64, duration: i64, hits: i64) -> RateLimitReq {
    RateLimitReq {
        key: key.into(),
        algorithm: Algorithm::TokenBucket,
        limit,
        duration,
        hits,
        ..Default::default()
    }
}

pub fn leaky_req(key: &str, limit: i64, duration: i64, hits: i64) -> RateLimitReq {
    RateLimitReq {
        key: key.into(),
        algorithm: Algorithm::LeakyBucket,
        limit,
        duration,
        hits,
        ..Default::default()
    }
}

/// Everything the limiter told a store, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Get(String),
    OnChange(String),
    Remove(String),
}

/// Store that remembers every call and keeps items in a plain map.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    items: Arc<Mutex<HashMap<String, CacheItem>>>,
    calls: Arc<Mutex<Vec<StoreCall>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Plant an item as if a previous process had persisted it.
    pub fn seed(&self, item: CacheItem) {
        self.items.lock().unwrap().insert(item.key.clone(), item);
    }

    /// Plant an item under an arbitrary slot, ignoring `item.key`. Lets
    /// tests model a corrupted backend that mis-files entries.
    pub fn seed_at(&self, slot: &str, item: CacheItem) {
        self.items.lock().unwrap().insert(slot.to_string(), item);
    }

    pub fn persisted(&self, key: &str) -> Option<CacheItem> {
        self.items.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn get(&self, req: &RateLimitReq) -> Result<Option<CacheItem>, StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Get(req.key.clone()));
        Ok(self.items.lock().unwrap().get(&req.key).cloned())
    }

    async fn on_change(&self, _req: &RateLimitReq, item: CacheItem) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(StoreCall::OnChange(item.key.clone()));
        self.items.lock().unwrap().insert(item.key.clone(), item);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Remove(key.to_string()));
        self.items.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Store whose every call fails; the limiter must shrug it off.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

#[async_trait]
impl Store for FailingStore {
    async fn get(&self, _req: &RateLimitReq) -> Result<Option<CacheItem>, StoreError> {
        Err("store backend unreachable".into())
    }

    async fn on_change(&self, _req: &RateLimitReq, _item: CacheItem) -> Result<(), StoreError> {
        Err("store backend unreachable".into())
    }

    async fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err("store backend unreachable".into())
    }
}

/// Read the clock the way the limiter does; panics are fine in tests.
pub fn now(clock: &ManualClock) -> i64 {
    clock.now_millis().unwrap()
}
