//! Leaky-bucket engine: continuous leak with a burst cap.
//!
//! The bucket regains allowance continuously, one unit every
//! `duration / limit` milliseconds, up to `burst`. The stored `remaining`
//! is fractional so sub-unit leak accumulates across calls; everything a
//! caller observes is the floor of that value, and every comparison below
//! floors before comparing so the observable behavior is integral.
//!
//! A duration change between requests is only overwritten into the stored
//! item; leak already accrued under the old rate is never recomputed.

use crate::cache::{BucketValue, Cache, CacheItem, LeakyBucketItem};
use crate::error::RateLimitError;
use crate::gregorian::{gregorian_duration, gregorian_expiration};
use crate::store::StoreEffect;
use crate::types::{Behavior, RateLimitReq, RateLimitResp, Status};

/// Run the leaky-bucket decision for `req` against the state in `item`.
///
/// Synchronous; the caller holds the per-key lock and performs the returned
/// [`StoreEffect`] after releasing it.
pub(crate) fn decide(
    cache: &dyn Cache,
    now: i64,
    item: Option<CacheItem>,
    req: &RateLimitReq,
) -> Result<(RateLimitResp, StoreEffect), RateLimitError> {
    // Zero burst means "cap at limit".
    let burst = if req.burst == 0 { req.limit } else { req.burst };

    let Some(item) = item else {
        return new_item(cache, now, burst, req);
    };

    let mut bucket = match item.value {
        BucketValue::LeakyBucket(bucket) => bucket,
        BucketValue::TokenBucket(_) => {
            // The dispatcher evicts mismatched items before calling in;
            // reaching here means the cache changed behind our back. Start
            // over.
            cache.remove(&req.key);
            return new_item(cache, now, burst, req);
        }
    };

    let mut dirty = false;

    if req.behavior.contains(Behavior::RESET_REMAINING) {
        bucket.remaining = burst as f64;
        dirty = true;
    }

    // Newly granted burst capacity fills the bucket up to the new cap;
    // shrinking the cap is left to the clamp below.
    if bucket.burst != burst {
        if burst > bucket.remaining as i64 {
            bucket.remaining = burst as f64;
        }
        bucket.burst = burst;
        dirty = true;
    }

    if bucket.limit != req.limit {
        bucket.limit = req.limit;
        dirty = true;
    }
    if bucket.duration != req.duration {
        bucket.duration = req.duration;
        dirty = true;
    }

    // Milliseconds for one unit of allowance to drip back.
    let mut duration = req.duration;
    let mut rate = duration as f64 / req.limit as f64;

    if req.behavior.contains(Behavior::DURATION_IS_GREGORIAN) {
        // The leak rate spreads over the full calendar interval; the local
        // duration shrinks to the remainder of the interval and only feeds
        // the cache-expiry refresh below.
        let interval = gregorian_duration(now, req.duration)?;
        let expire = gregorian_expiration(now, req.duration)?;
        rate = interval as f64 / req.limit as f64;
        duration = expire - now;
    }

    // Apply the leak accrued since the last update. The whole-unit guard
    // keeps rapid back-to-back calls from burning the elapsed time on
    // additions too small to ever floor up.
    let elapsed = now - bucket.updated_at;
    let leak = elapsed as f64 / rate;
    if leak as i64 > 0 {
        bucket.remaining += leak;
        bucket.updated_at = now;
        dirty = true;
    }

    if bucket.remaining as i64 > bucket.burst {
        bucket.remaining = bucket.burst as f64;
        dirty = true;
    }

    let mut resp = RateLimitResp {
        status: Status::UnderLimit,
        limit: bucket.limit,
        remaining: bucket.remaining as i64,
        reset_time: now + (bucket.limit - bucket.remaining as i64) * rate as i64,
    };

    if bucket.remaining as i64 == 0 {
        resp.status = Status::OverLimit;
        return finish(cache, req, item.expire_at, bucket, resp, dirty);
    }

    if bucket.remaining as i64 == req.hits {
        bucket.remaining -= req.hits as f64;
        resp.remaining = 0;
        resp.reset_time = now + (resp.limit - resp.remaining) * rate as i64;
        return finish(cache, req, item.expire_at, bucket, resp, true);
    }

    // Oversized request: reject without consuming.
    if req.hits > bucket.remaining as i64 {
        resp.status = Status::OverLimit;
        return finish(cache, req, item.expire_at, bucket, resp, dirty);
    }

    if req.hits == 0 {
        return finish(cache, req, item.expire_at, bucket, resp, dirty);
    }

    bucket.remaining -= req.hits as f64;
    resp.remaining = bucket.remaining as i64;
    resp.reset_time = now + (resp.limit - resp.remaining) * rate as i64;
    // Consumption pushes the idle deadline out; the refreshed expiry rides
    // the same write-back so the store mirror stays consistent.
    finish(cache, req, now + duration, bucket, resp, true)
}

fn finish(
    cache: &dyn Cache,
    req: &RateLimitReq,
    expire_at: i64,
    bucket: LeakyBucketItem,
    resp: RateLimitResp,
    dirty: bool,
) -> Result<(RateLimitResp, StoreEffect), RateLimitError> {
    let item = CacheItem {
        key: req.key.clone(),
        expire_at,
        value: BucketValue::LeakyBucket(bucket),
    };
    if dirty {
        cache.add(item.clone());
        Ok((resp, StoreEffect::Write(item)))
    } else {
        Ok((resp, StoreEffect::None))
    }
}

/// Create a fresh bucket for `req.key`, filled to `burst` minus the hits.
fn new_item(
    cache: &dyn Cache,
    now: i64,
    burst: i64,
    req: &RateLimitReq,
) -> Result<(RateLimitResp, StoreEffect), RateLimitError> {
    // The fresh-path leak rate comes from the requested duration even under
    // calendar alignment; only the cache expiry shrinks to the remainder of
    // the interval.
    let mut duration = req.duration;
    let rate = duration as f64 / req.limit as f64;
    if req.behavior.contains(Behavior::DURATION_IS_GREGORIAN) {
        let expire = gregorian_expiration(now, req.duration)?;
        duration = expire - now;
    }

    let mut bucket = LeakyBucketItem {
        burst,
        limit: req.limit,
        duration,
        remaining: (burst - req.hits) as f64,
        updated_at: now,
    };

    let mut resp = RateLimitResp {
        status: Status::UnderLimit,
        limit: req.limit,
        remaining: burst - req.hits,
        reset_time: now + (req.limit - (burst - req.hits)) * rate as i64,
    };

    // A request larger than the whole bucket starts it out empty and over
    // the limit.
    if req.hits > burst {
        bucket.remaining = 0.0;
        resp.status = Status::OverLimit;
        resp.remaining = 0;
        resp.reset_time = now + resp.limit * rate as i64;
    }

    let item = CacheItem {
        key: req.key.clone(),
        expire_at: now + duration,
        value: BucketValue::LeakyBucket(bucket),
    };
    cache.add(item.clone());
    Ok((resp, StoreEffect::Write(item)))
}
