//! Durable-store capability.
//!
//! The store is a write-through mirror of the cache: it is consulted on a
//! cache miss and notified after state changes, but it is never on the
//! decision path. A slow or failing store therefore degrades durability,
//! not correctness; the cache decision always stands.

use crate::cache::CacheItem;
use crate::types::RateLimitReq;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Error type for store operations.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Durable-store capability consumed by the decision core.
///
/// All methods are best-effort from the core's perspective: a lookup error
/// reads as a miss, and a failed notification is logged and dropped.
#[async_trait]
pub trait Store: Send + Sync {
    /// Durable lookup, consulted on cache miss.
    async fn get(&self, req: &RateLimitReq) -> Result<Option<CacheItem>, StoreError>;

    /// Write-through notification. The item carries its post-mutation state;
    /// the core has already answered the request by the time this runs.
    async fn on_change(&self, req: &RateLimitReq, item: CacheItem) -> Result<(), StoreError>;

    /// Drop the persisted copy for `key`.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Side effect the engines hand back to the coordinator, performed after
/// the response is computed and the per-key lock released.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum StoreEffect {
    /// No state change; nothing to mirror.
    None,
    /// The item was mutated; notify the store with its final state.
    Write(CacheItem),
    /// The item was destroyed; remove the persisted copy.
    Remove,
}

/// In-process store keeping serde-serialized items.
///
/// Items round-trip through their serialized form on every access, so this
/// doubles as a fixture proving the persistence contract: anything an
/// external store would write to disk survives the trip.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted items.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check whether nothing is persisted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
        serde_json::to_string(value).map_err(Into::into)
    }

    fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
        serde_json::from_str(raw).map_err(Into::into)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, req: &RateLimitReq) -> Result<Option<CacheItem>, StoreError> {
        let raw = {
            let guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
            guard.get(&req.key).cloned()
        };
        match raw {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn on_change(&self, _req: &RateLimitReq, item: CacheItem) -> Result<(), StoreError> {
        let raw = Self::encode(&item)?;
        let mut guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(item.key, raw);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
        Ok(())
    }
}
