//! Sliding-window rate limiter, keyed per `(source_kind, source_id)`.
//!
//! Timestamps of recent calls are stored in a Redis sorted set scored by
//! their own insertion time; the oldest surviving entry governs when the
//! window resets. This gives accurate, distributed sliding-window limits
//! without the coarseness of fixed buckets.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::IngestionError;

/// Per-kind `(max_requests, window)` defaults, applied when a kind has no
/// explicit override in configuration.
pub fn default_limit_for_kind(kind: &str) -> RateLimitRule {
    match kind {
        "FEED" => RateLimitRule { max_requests: 60, window_ms: 60_000 },
        "VIDEO_CHANNEL" => RateLimitRule { max_requests: 100, window_ms: 60_000 },
        "FORUM" => RateLimitRule { max_requests: 60, window_ms: 60_000 },
        "MICROBLOG" => RateLimitRule { max_requests: 100, window_ms: 3_600_000 },
        _ => RateLimitRule { max_requests: 60, window_ms: 60_000 },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub max_requests: u64,
    pub window_ms: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_ms: u64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Sliding-window rate limiter backed by Redis, with per-kind rule
/// overrides and a denial counter for observability.
pub struct RateLimiter {
    redis: redis::aio::ConnectionManager,
    rules: RwLock<HashMap<String, RateLimitRule>>,
    denials: RwLock<HashMap<String, u64>>,
}

impl RateLimiter {
    pub fn new(redis: redis::aio::ConnectionManager) -> Self {
        Self {
            redis,
            rules: RwLock::new(HashMap::new()),
            denials: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_rule(&self, kind: &str, rule: RateLimitRule) {
        self.rules.write().insert(kind.to_string(), rule);
    }

    fn rule_for(&self, kind: &str) -> RateLimitRule {
        self.rules
            .read()
            .get(kind)
            .copied()
            .unwrap_or_else(|| default_limit_for_kind(kind))
    }

    fn zset_key(kind: &str, id: &str) -> String {
        format!("ratelimit:{kind}:{id}")
    }

    /// `check(kind, id) -> {allowed, remaining, reset_ms}` without
    /// recording a hit.
    pub async fn check(&self, kind: &str, id: &str) -> Result<RateLimitDecision, IngestionError> {
        let rule = self.rule_for(kind);
        let key = Self::zset_key(kind, id);
        let mut conn = self.redis.clone();
        let now = now_ms();
        let window_start = now - rule.window_ms;

        redis::cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg(0)
            .arg(window_start)
            .query_async::<()>(&mut conn)
            .await?;

        let count: u64 = redis::cmd("ZCARD").arg(&key).query_async(&mut conn).await?;

        let oldest: Vec<(String, i64)> = redis::cmd("ZRANGE")
            .arg(&key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        let reset_ms = match oldest.first() {
            Some((_, score)) => ((*score + rule.window_ms) - now).max(0) as u64,
            None => rule.window_ms as u64,
        };

        if count >= rule.max_requests {
            self.denials.write().entry(format!("{kind}:{id}")).and_modify(|c| *c += 1).or_insert(1);
            debug!(kind, id, count, max = rule.max_requests, "rate limit denied");
            return Ok(RateLimitDecision { allowed: false, remaining: 0, reset_ms });
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining: rule.max_requests - count,
            reset_ms,
        })
    }

    /// `consume(kind, id)` records a hit only if the check allows it.
    pub async fn consume(&self, kind: &str, id: &str) -> Result<RateLimitDecision, IngestionError> {
        let decision = self.check(kind, id).await?;
        if !decision.allowed {
            return Ok(decision);
        }

        let rule = self.rule_for(kind);
        let key = Self::zset_key(kind, id);
        let mut conn = self.redis.clone();
        let now = now_ms();
        let member = format!("{now}-{}", Uuid::new_v4());

        redis::cmd("ZADD")
            .arg(&key)
            .arg(now)
            .arg(&member)
            .query_async::<()>(&mut conn)
            .await?;
        redis::cmd("PEXPIRE")
            .arg(&key)
            .arg(rule.window_ms)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(decision)
    }

    pub fn denial_count(&self, kind: &str, id: &str) -> u64 {
        self.denials.read().get(&format!("{kind}:{id}")).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_per_kind_table() {
        assert_eq!(default_limit_for_kind("FEED").max_requests, 60);
        assert_eq!(default_limit_for_kind("VIDEO_CHANNEL").max_requests, 100);
        assert_eq!(default_limit_for_kind("MICROBLOG").window_ms, 3_600_000);
        assert_eq!(default_limit_for_kind("SOMETHING_ELSE").max_requests, 60);
    }
}
