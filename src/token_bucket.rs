//! Token-bucket engine: fixed-window allowance decrement.
//!
//! A key's window opens on its first request and holds `limit` units. Hits
//! decrement the allowance; the window turns over when the cache drops the
//! item at `expire_at`, so an expired key simply looks absent and the next
//! request opens a fresh window.
//!
//! Two deliberate asymmetries in the decision rules:
//!
//! - An exhausted window (`remaining == 0`) writes `OverLimit` into the
//!   stored item, so repeated inspection keeps answering `OverLimit`
//!   without recomputation ("sticky" exhaustion).
//! - A single oversized request (`hits > remaining > 0`) is rejected
//!   without consuming and without poisoning the stored status; smaller
//!   requests in the same window still succeed.

use crate::cache::{BucketValue, Cache, CacheItem, TokenBucketItem};
use crate::error::RateLimitError;
use crate::gregorian::gregorian_expiration;
use crate::store::StoreEffect;
use crate::types::{Behavior, RateLimitReq, RateLimitResp, Status};

/// Run the token-bucket decision for `req` against the state in `item`.
///
/// Synchronous; the caller holds the per-key lock and performs the returned
/// [`StoreEffect`] after releasing it.
pub(crate) fn decide(
    cache: &dyn Cache,
    now: i64,
    item: Option<CacheItem>,
    req: &RateLimitReq,
) -> Result<(RateLimitResp, StoreEffect), RateLimitError> {
    let Some(item) = item else {
        return new_item(cache, now, req);
    };

    if req.behavior.contains(Behavior::RESET_REMAINING) {
        cache.remove(&req.key);
        let resp = RateLimitResp {
            status: Status::UnderLimit,
            limit: req.limit,
            remaining: req.limit,
            reset_time: 0,
        };
        return Ok((resp, StoreEffect::Remove));
    }

    let mut expire_at = item.expire_at;
    let mut bucket = match item.value {
        BucketValue::TokenBucket(bucket) => bucket,
        BucketValue::LeakyBucket(_) => {
            // The dispatcher evicts mismatched items before calling in;
            // reaching here means the cache changed behind our back. Start
            // over.
            cache.remove(&req.key);
            return new_item(cache, now, req);
        }
    };

    let mut dirty = false;

    // Reconcile a limit change: the consumed-so-far count carries over, so
    // raising the ceiling grants the difference and lowering it claws back
    // down to zero at most.
    if bucket.limit != req.limit {
        bucket.remaining = (bucket.remaining + (req.limit - bucket.limit)).max(0);
        bucket.limit = req.limit;
        dirty = true;
    }

    // Reconcile a duration change against the original window start.
    if bucket.duration != req.duration {
        let mut expire = if req.behavior.contains(Behavior::DURATION_IS_GREGORIAN) {
            gregorian_expiration(now, req.duration)?
        } else {
            bucket.created_at + req.duration
        };

        // The shortened window may already be over; renew it in place.
        if expire <= now {
            expire = if req.behavior.contains(Behavior::DURATION_IS_GREGORIAN) {
                gregorian_expiration(now, req.duration)?
            } else {
                now + req.duration
            };
            bucket.created_at = now;
            bucket.remaining = bucket.limit;
        }

        expire_at = expire;
        bucket.duration = req.duration;
        dirty = true;
    }

    let mut resp = RateLimitResp {
        status: bucket.status,
        limit: req.limit,
        remaining: bucket.remaining,
        reset_time: expire_at,
    };

    if req.hits == 0 {
        return finish(cache, req, expire_at, bucket, resp, dirty);
    }

    if bucket.remaining == 0 {
        resp.status = Status::OverLimit;
        if bucket.status != Status::OverLimit {
            bucket.status = Status::OverLimit;
            dirty = true;
        }
        return finish(cache, req, expire_at, bucket, resp, dirty);
    }

    if req.hits == bucket.remaining {
        bucket.remaining = 0;
        resp.remaining = 0;
        return finish(cache, req, expire_at, bucket, resp, true);
    }

    // Oversized request: reject without consuming, and without writing the
    // sticky status.
    if req.hits > bucket.remaining {
        resp.status = Status::OverLimit;
        return finish(cache, req, expire_at, bucket, resp, dirty);
    }

    bucket.remaining -= req.hits;
    resp.remaining = bucket.remaining;
    finish(cache, req, expire_at, bucket, resp, true)
}

fn finish(
    cache: &dyn Cache,
    req: &RateLimitReq,
    expire_at: i64,
    bucket: TokenBucketItem,
    resp: RateLimitResp,
    dirty: bool,
) -> Result<(RateLimitResp, StoreEffect), RateLimitError> {
    let item = CacheItem {
        key: req.key.clone(),
        expire_at,
        value: BucketValue::TokenBucket(bucket),
    };
    if dirty {
        cache.add(item.clone());
        Ok((resp, StoreEffect::Write(item)))
    } else {
        Ok((resp, StoreEffect::None))
    }
}

/// Open a fresh window for `req.key`.
fn new_item(
    cache: &dyn Cache,
    now: i64,
    req: &RateLimitReq,
) -> Result<(RateLimitResp, StoreEffect), RateLimitError> {
    let expire = if req.behavior.contains(Behavior::DURATION_IS_GREGORIAN) {
        gregorian_expiration(now, req.duration)?
    } else {
        now + req.duration
    };

    let mut bucket = TokenBucketItem {
        limit: req.limit,
        duration: req.duration,
        remaining: req.limit - req.hits,
        created_at: now,
        status: Status::UnderLimit,
    };

    let mut resp = RateLimitResp {
        status: Status::UnderLimit,
        limit: req.limit,
        remaining: bucket.remaining,
        reset_time: expire,
    };

    // A request larger than the whole window is rejected outright; nothing
    // is consumed from the fresh allowance.
    if req.hits > req.limit {
        resp.status = Status::OverLimit;
        resp.remaining = req.limit;
        bucket.remaining = req.limit;
    }

    let item = CacheItem {
        key: req.key.clone(),
        expire_at: expire,
        value: BucketValue::TokenBucket(bucket),
    };
    cache.add(item.clone());
    Ok((resp, StoreEffect::Write(item)))
}
