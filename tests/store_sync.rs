//! Cache/store coordination: miss fallback, write-through, destructive
//! removal, and failure tolerance.

mod common;

use common::{
    harness_with_store, leaky_req, token_req, FailingStore, RecordingStore, StoreCall, START,
};
use floodgate::{Behavior, BucketValue, Cache, CacheItem, RateLimitReq, Status, TokenBucketItem};
use std::sync::Arc;

#[tokio::test]
async fn cache_miss_falls_back_to_store() {
    let store = RecordingStore::new();
    // A previous process half-spent this window.
    store.seed(CacheItem {
        key: "durable:key".into(),
        expire_at: START + 60_000,
        value: BucketValue::TokenBucket(TokenBucketItem {
            limit: 10,
            duration: 60_000,
            remaining: 4,
            created_at: START - 1_000,
            status: Status::UnderLimit,
        }),
    });
    let h = harness_with_store(Arc::new(store.clone()));

    let resp = h.limiter.decide(&token_req("durable:key", 10, 60_000, 1)).await.unwrap();
    assert_eq!(resp.remaining, 3, "resumed from the persisted window");

    // The hit was served into the cache; the next request must not go back
    // to the store.
    store.clear_calls();
    h.limiter.decide(&token_req("durable:key", 10, 60_000, 1)).await.unwrap();
    assert!(
        !store.calls().contains(&StoreCall::Get("durable:key".into())),
        "second request should be cache-served: {:?}",
        store.calls()
    );
}

#[tokio::test]
async fn mutations_notify_the_store_once_per_request() {
    let store = RecordingStore::new();
    let h = harness_with_store(Arc::new(store.clone()));

    h.limiter.decide(&token_req("wt:key", 10, 60_000, 1)).await.unwrap();
    let changes = store
        .calls()
        .iter()
        .filter(|c| matches!(c, StoreCall::OnChange(_)))
        .count();
    assert_eq!(changes, 1);

    // The notification carries post-mutation state.
    match store.persisted("wt:key").unwrap().value {
        BucketValue::TokenBucket(t) => assert_eq!(t.remaining, 9),
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn non_mutating_requests_stay_quiet() {
    let store = RecordingStore::new();
    let h = harness_with_store(Arc::new(store.clone()));
    h.limiter.decide(&token_req("quiet:key", 10, 60_000, 4)).await.unwrap();
    store.clear_calls();

    // Inspect-only: no state change, no write-through.
    h.limiter.decide(&token_req("quiet:key", 10, 60_000, 0)).await.unwrap();
    // Oversized rejection: also not a mutation.
    h.limiter.decide(&token_req("quiet:key", 10, 60_000, 9)).await.unwrap();

    let changes: Vec<_> = store
        .calls()
        .into_iter()
        .filter(|c| matches!(c, StoreCall::OnChange(_)))
        .collect();
    assert!(changes.is_empty(), "unexpected write-through: {:?}", changes);
}

#[tokio::test]
async fn reset_removes_from_cache_and_store() {
    let store = RecordingStore::new();
    let h = harness_with_store(Arc::new(store.clone()));
    h.limiter.decide(&token_req("reset:key", 10, 60_000, 5)).await.unwrap();
    assert!(store.persisted("reset:key").is_some());

    let reset = RateLimitReq {
        behavior: Behavior::RESET_REMAINING,
        ..token_req("reset:key", 10, 60_000, 0)
    };
    let resp = h.limiter.decide(&reset).await.unwrap();
    assert_eq!(resp.remaining, 10);
    assert!(h.cache.get_item("reset:key").is_none());
    assert!(store.persisted("reset:key").is_none());
}

#[tokio::test]
async fn algorithm_switch_purges_the_persisted_copy() {
    let store = RecordingStore::new();
    let h = harness_with_store(Arc::new(store.clone()));
    h.limiter.decide(&token_req("switch:key", 10, 60_000, 5)).await.unwrap();
    store.clear_calls();

    h.limiter.decide(&leaky_req("switch:key", 5, 50, 1)).await.unwrap();

    // Old copy removed, then the fresh bucket written.
    let calls: Vec<_> = store
        .calls()
        .into_iter()
        .filter(|c| !matches!(c, StoreCall::Get(_)))
        .collect();
    assert_eq!(
        calls,
        vec![
            StoreCall::Remove("switch:key".into()),
            StoreCall::OnChange("switch:key".into()),
        ]
    );
    match store.persisted("switch:key").unwrap().value {
        BucketValue::LeakyBucket(b) => assert_eq!(b.remaining, 4.0),
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn store_failures_never_fail_the_request() {
    let h = harness_with_store(Arc::new(FailingStore));

    // Lookup failure reads as a miss; write-through failure is swallowed.
    let resp = h.limiter.decide(&token_req("flaky:key", 2, 1_000, 1)).await.unwrap();
    assert_eq!(resp.status, Status::UnderLimit);
    assert_eq!(resp.remaining, 1);

    // The cache decision stands across calls.
    let resp = h.limiter.decide(&token_req("flaky:key", 2, 1_000, 1)).await.unwrap();
    assert_eq!(resp.remaining, 0);
    let resp = h.limiter.decide(&token_req("flaky:key", 2, 1_000, 1)).await.unwrap();
    assert_eq!(resp.status, Status::OverLimit);
}

#[tokio::test]
async fn corrupt_persisted_item_is_ignored() {
    let store = RecordingStore::new();
    // Mis-filed in the backend: stored under "other:key" but claiming to
    // belong to "sane:key". The sanity check must reject it and the
    // request proceeds as a miss.
    store.seed_at(
        "other:key",
        CacheItem {
            key: "sane:key".into(),
            expire_at: START + 60_000,
            value: BucketValue::TokenBucket(TokenBucketItem {
                limit: 2,
                duration: 60_000,
                remaining: 0,
                created_at: START,
                status: Status::OverLimit,
            }),
        },
    );
    let h = harness_with_store(Arc::new(store.clone()));

    let resp = h.limiter.decide(&token_req("other:key", 2, 60_000, 1)).await.unwrap();
    assert_eq!(resp.status, Status::UnderLimit);
    assert_eq!(resp.remaining, 1);
}

#[tokio::test]
async fn window_survives_a_cache_restart() {
    use floodgate::{InMemoryCache, ManualClock, MemoryStore, RateLimiter};

    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(START);

    let first = RateLimiter::builder()
        .clock(Arc::new(clock.clone()))
        .store(store.clone())
        .build();
    first.decide(&token_req("restart:key", 10, 60_000, 7)).await.unwrap();

    // New process: empty cache, same store, same wall clock.
    let second = RateLimiter::builder()
        .clock(Arc::new(clock.clone()))
        .cache(Arc::new(InMemoryCache::new(Arc::new(clock.clone()))))
        .store(store)
        .build();
    let resp = second.decide(&token_req("restart:key", 10, 60_000, 1)).await.unwrap();
    assert_eq!(resp.remaining, 2, "the half-spent window came back from the store");
}

#[tokio::test]
async fn leaky_mutations_round_trip_through_store() {
    let store = RecordingStore::new();
    let h = harness_with_store(Arc::new(store.clone()));

    h.limiter.decide(&leaky_req("leak:key", 5, 50, 2)).await.unwrap();
    h.clock.advance(10);
    h.limiter.decide(&leaky_req("leak:key", 5, 50, 1)).await.unwrap();

    match store.persisted("leak:key").unwrap().value {
        BucketValue::LeakyBucket(b) => {
            // 3 remaining, +1 leaked, -1 consumed.
            assert_eq!(b.remaining as i64, 3);
            assert_eq!(b.updated_at, START + 10);
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}
