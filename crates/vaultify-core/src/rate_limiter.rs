//! Token-bucket rate limiter (C9).
//!
//! State `(tokens, last_refill_ts)` lives in Redis, keyed per principal.
//! Refill, consume, and store happen inside a single `EVAL` so concurrent
//! requests for the same principal can't race a client-side
//! read-modify-write — this is why a server-evaluated script is required
//! rather than separate `GET`/`SET` calls.

use crate::error::CoreError;

/// Lua script implementing the refill-then-consume step atomically.
///
/// `KEYS[1]` is the bucket key. `ARGV` carries capacity, refill rate
/// (tokens/second), the current unix timestamp (seconds, as a float),
/// and the TTL to set on the key so idle buckets don't linger forever.
///
/// A missing key is treated as a full bucket — the first-ever request
/// for a principal is always admitted.
const TOKEN_BUCKET_SCRIPT: &str = r"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill_ts')
local tokens = tonumber(bucket[1])
local last_refill_ts = tonumber(bucket[2])

if tokens == nil then
    tokens = capacity
    last_refill_ts = now
end

local elapsed = now - last_refill_ts
if elapsed < 0 then
    elapsed = 0
end

tokens = math.min(capacity, tokens + elapsed * refill_rate)

local admitted = 0
if tokens >= 1 then
    tokens = tokens - 1
    admitted = 1
end

redis.call('HMSET', key, 'tokens', tokens, 'last_refill_ts', now)
redis.call('EXPIRE', key, ttl)

return admitted
";

/// Per-principal token bucket backed by a shared Redis instance, making
/// admission decisions correct across multiple server instances.
pub struct RateLimiter {
    client: redis::Client,
    /// Bucket capacity, `B`.
    capacity: f64,
    /// Refill rate in tokens/second, `r`.
    refill_rate: f64,
}

impl RateLimiter {
    /// Builds a limiter against `redis_addr` with the given capacity and
    /// refill rate.
    pub fn new(redis_addr: &str, capacity: f64, refill_rate: f64) -> Result<Self, CoreError> {
        let client = redis::Client::open(redis_addr)
            .map_err(|e| CoreError::Internal(format!("invalid redis address: {e}")))?;
        Ok(Self {
            client,
            capacity,
            refill_rate,
        })
    }

    /// Attempts to admit one request for `principal_key` (typically the
    /// user id as a string). Returns `Ok(())` if admitted, or
    /// [`CoreError::RateLimited`] if the bucket is empty.
    pub async fn admit(&self, principal_key: &str) -> Result<(), CoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| CoreError::Internal(format!("system clock error: {e}")))?
            .as_secs_f64();

        // Idle buckets expire well past the time a full refill would take,
        // so the cache never carries state for a principal that never
        // comes back.
        let ttl_secs = ((self.capacity / self.refill_rate.max(f64::MIN_POSITIVE)) * 4.0)
            .ceil()
            .max(60.0) as i64;

        let key = format!("vaultify:rate_limit:{principal_key}");

        let admitted: i64 = redis::Script::new(TOKEN_BUCKET_SCRIPT)
            .key(&key)
            .arg(self.capacity)
            .arg(self.refill_rate)
            .arg(now)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        if admitted == 1 {
            Ok(())
        } else {
            Err(CoreError::RateLimited)
        }
    }
}

/// Pure-Rust mirror of [`TOKEN_BUCKET_SCRIPT`]'s refill-then-consume step,
/// parameterized over an injectable clock so the math is testable without
/// a Redis server. Not used by [`RateLimiter::admit`] itself — the real
/// decision always happens server-side in Lua so concurrent callers can't
/// race a client-side read-modify-write; this exists only to pin down the
/// formula the script implements.
#[cfg(test)]
fn refill_then_consume(
    bucket: Option<(f64, f64)>,
    capacity: f64,
    refill_rate: f64,
    now: f64,
) -> (bool, f64) {
    let (mut tokens, last_refill_ts) = bucket.unwrap_or((capacity, now));
    let elapsed = (now - last_refill_ts).max(0.0);
    tokens = (tokens + elapsed * refill_rate).min(capacity);

    if tokens >= 1.0 {
        tokens -= 1.0;
        (true, tokens)
    } else {
        (false, tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::{refill_then_consume, RateLimiter};

    #[test]
    fn missing_bucket_is_treated_as_full_and_admits() {
        let (admitted, remaining) = refill_then_consume(None, 10.0, 1.0, 1_000.0);
        assert!(admitted);
        assert_eq!(remaining, 9.0);
    }

    #[test]
    fn empty_bucket_with_no_elapsed_time_is_rate_limited() {
        let (admitted, remaining) = refill_then_consume(Some((0.0, 1_000.0)), 10.0, 1.0, 1_000.0);
        assert!(!admitted);
        assert_eq!(remaining, 0.0);
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let (admitted, remaining) = refill_then_consume(Some((5.0, 0.0)), 10.0, 1.0, 1_000_000.0);
        assert!(admitted);
        assert_eq!(remaining, 9.0);
    }

    #[test]
    fn clock_skew_never_grants_negative_elapsed_time() {
        // `now` before `last_refill_ts` must not manufacture tokens.
        let (admitted, remaining) = refill_then_consume(Some((0.0, 1_000.0)), 10.0, 1.0, 500.0);
        assert!(!admitted);
        assert_eq!(remaining, 0.0);
    }

    #[test]
    fn partial_refill_admits_exactly_once() {
        // capacity 1, refill 1 token/sec, bucket empty 0.5s ago: 0.5
        // tokens available, not enough to admit.
        let (admitted, remaining) = refill_then_consume(Some((0.0, 1_000.0)), 1.0, 1.0, 1_000.5);
        assert!(!admitted);
        assert_eq!(remaining, 0.5);
    }

    #[test]
    fn rate_limiter_rejects_an_invalid_redis_address() {
        assert!(RateLimiter::new("not a redis url", 10.0, 1.0).is_err());
    }
}
