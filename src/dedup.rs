//! Deduplication & idempotency (derived key + short-lived check/mark store).
//!
//! Dedup is best-effort: it cuts calls to the collaborator, but the
//! collaborator remains the authority on uniqueness via the idempotency
//! key it is handed in `create_or_get`.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use parking_lot::RwLock;
use tracing::{debug, warn};
use url::Url;

const TRACKING_PARAM_PREFIXES: &[&str] = &["utm_"];
const TRACKING_PARAMS: &[&str] = &["ref", "source"];

/// Canonicalizes a URL per the dedup key rules: lowercase host, strip
/// tracking query parameters, collapse trailing slashes.
pub fn canonicalize_url(url_str: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(url_str)?;
    url.set_fragment(None);

    if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        let _ = url.set_host(Some(&lower));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.as_ref();
            !TRACKING_PARAMS.contains(&k)
                && !TRACKING_PARAM_PREFIXES.iter().any(|p| k.starts_with(p))
        })
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    url.set_query(None);
    if !kept.is_empty() {
        let query = kept
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let mut path = url.path().to_string();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    url.set_path(&path);

    Ok(url.to_string())
}

fn hash_prefix(content: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest).chars().take(len).collect()
}

/// Derives the dedup key for an item per the rules in order:
/// canonical URL, else `sha256(title|published_at)[..32]`, else a
/// non-deduplicating key from current time and random bytes.
pub fn derive_key(url: Option<&str>, title: Option<&str>, published_at: Option<&str>) -> String {
    if let Some(url) = url {
        if let Ok(canonical) = canonicalize_url(url) {
            return canonical;
        }
    }

    if let Some(title) = title {
        let content = format!("{}|{}", title, published_at.unwrap_or(""));
        return hash_prefix(&content, 32);
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut rng = rand::thread_rng();
    let salt: u64 = rng.gen();
    format!("nondedup:{now:x}:{salt:x}")
}

/// Result of a dedup check.
#[derive(Debug, Clone)]
pub struct DedupCheck {
    pub duplicate: bool,
    pub prior_id: Option<String>,
}

/// Short-lived key-value dedup store. Backed by Redis when configured,
/// falling back to (and always also populating) an in-memory set so a
/// Redis outage degrades to per-process dedup rather than none.
pub struct DedupStore {
    seen: Arc<RwLock<HashSet<String>>>,
    max_entries: usize,
    redis: Option<redis::aio::ConnectionManager>,
    ttl_seconds: u64,
}

impl DedupStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            seen: Arc::new(RwLock::new(HashSet::with_capacity(max_entries))),
            max_entries,
            redis: None,
            ttl_seconds: 86_400,
        }
    }

    pub fn with_redis(max_entries: usize, redis: redis::aio::ConnectionManager, ttl_seconds: u64) -> Self {
        Self {
            seen: Arc::new(RwLock::new(HashSet::with_capacity(max_entries))),
            max_entries,
            redis: Some(redis),
            ttl_seconds,
        }
    }

    /// `check(key) -> {duplicate, prior_id?}` per the component contract.
    /// `prior_id` is only populated when Redis stores the content_id value.
    pub async fn check(&self, key: &str) -> DedupCheck {
        if let Some(ref redis) = self.redis {
            match self.get_redis(key, redis.clone()).await {
                Ok(Some(content_id)) => {
                    debug!(key, "dedup hit in redis");
                    return DedupCheck { duplicate: true, prior_id: Some(content_id) };
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "dedup redis check failed, falling back to memory"),
            }
        }

        if self.seen.read().contains(key) {
            debug!(key, "dedup hit in memory");
            return DedupCheck { duplicate: true, prior_id: None };
        }

        DedupCheck { duplicate: false, prior_id: None }
    }

    /// `mark(key, content_id, ttl)` per the component contract.
    pub async fn mark(&self, key: &str, content_id: &str) {
        if let Some(ref redis) = self.redis {
            if let Err(err) = self.set_redis(key, content_id, redis.clone()).await {
                warn!(error = %err, "failed to write dedup entry to redis");
            }
        }

        let mut seen = self.seen.write();
        if seen.len() >= self.max_entries {
            debug!(entries = seen.len(), max = self.max_entries, "evicting dedup cache");
            seen.clear();
        }
        seen.insert(key.to_string());
    }

    async fn get_redis(&self, key: &str, mut redis: redis::aio::ConnectionManager) -> Result<Option<String>, redis::RedisError> {
        let redis_key = format!("dedup:{key}");
        redis::cmd("GET").arg(&redis_key).query_async(&mut redis).await
    }

    async fn set_redis(&self, key: &str, content_id: &str, mut redis: redis::aio::ConnectionManager) -> Result<(), redis::RedisError> {
        let redis_key = format!("dedup:{key}");
        redis::cmd("SET")
            .arg(&redis_key)
            .arg(content_id)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async::<()>(&mut redis)
            .await
    }

    pub fn len(&self) -> usize {
        self.seen.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.read().is_empty()
    }

    pub fn clear(&self) {
        self.seen.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_tracking_params_and_fragment() {
        let url = "https://Example.com/article/?id=123&utm_source=twitter&ref=front#top";
        let canonical = canonicalize_url(url).unwrap();
        assert_eq!(canonical, "https://example.com/article?id=123");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let url = "https://example.com/a/?utm_campaign=x&z=1&a=2";
        let once = canonicalize_url(url).unwrap();
        let twice = canonicalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn derive_key_prefers_url() {
        let key = derive_key(Some("https://example.com/post?utm_source=x"), Some("Title"), None);
        assert_eq!(key, "https://example.com/post");
    }

    #[test]
    fn derive_key_falls_back_to_title_hash() {
        let key1 = derive_key(None, Some("Breaking News"), Some("2024-01-15"));
        let key2 = derive_key(None, Some("Breaking News"), Some("2024-01-15"));
        let key3 = derive_key(None, Some("Different"), Some("2024-01-15"));
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32);
        assert_ne!(key1, key3);
    }

    #[test]
    fn derive_key_non_deduplicating_fallback_is_unique() {
        let a = derive_key(None, None, None);
        let b = derive_key(None, None, None);
        assert_ne!(a, b);
        assert!(a.starts_with("nondedup:"));
    }

    #[tokio::test]
    async fn check_and_mark_round_trip() {
        let store = DedupStore::new(1000);
        let key = derive_key(Some("https://example.com/x"), None, None);

        assert!(!store.check(&key).await.duplicate);
        store.mark(&key, "content-1").await;
        assert!(store.check(&key).await.duplicate);
    }
}
