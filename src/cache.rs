//! Idempotency cache
//!
//! Caches responses of the non-idempotent mint endpoints (mint, swap, melt)
//! so a client retrying a request it lost the response to gets the original
//! answer back instead of a double-spend error. Entries live in process
//! memory only and never survive a restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bitcoin::hashes::sha256::Hash as Sha256Hash;
use bitcoin::hashes::Hash;
use tokio::sync::Mutex;

/// How long a cached response is served
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 5);

/// Hard limit on cached entries
pub const DEFAULT_ITEM_LIMIT: usize = 10_000;

/// Request bodies over this size are not cache eligible
pub const REQUEST_BODY_SIZE_LIMIT: usize = 2 * 1024 * 1024;

/// Cache key, a digest over method, path and body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

struct CacheItem {
    value: Vec<u8>,
    expiration: Instant,
}

/// Request-response cache for the mint endpoints
#[derive(Debug)]
pub struct HttpCache {
    ttl: Duration,
    limit: usize,
    items: Mutex<HashMap<CacheKey, CacheItem>>,
}

impl std::fmt::Debug for CacheItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheItem")
            .field("len", &self.value.len())
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl Default for HttpCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_ITEM_LIMIT)
    }
}

impl HttpCache {
    /// Create new [`HttpCache`]
    pub fn new(ttl: Duration, limit: usize) -> Self {
        Self {
            ttl,
            limit,
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Key for a request, `None` when the request is not cache eligible
    pub fn key(&self, method: &str, path: &str, body: &[u8]) -> Option<CacheKey> {
        if body.len() > REQUEST_BODY_SIZE_LIMIT {
            return None;
        }

        let mut preimage = Vec::with_capacity(method.len() + path.len() + body.len());
        preimage.extend_from_slice(method.as_bytes());
        preimage.extend_from_slice(path.as_bytes());
        preimage.extend_from_slice(body);

        Some(CacheKey(Sha256Hash::hash(&preimage).to_byte_array()))
    }

    /// Look up a cached response
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let mut items = self.items.lock().await;

        match items.get(key) {
            Some(item) if item.expiration > Instant::now() => Some(item.value.clone()),
            Some(_) => {
                items.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a response
    pub async fn set(&self, key: CacheKey, value: Vec<u8>) {
        let mut items = self.items.lock().await;

        if items.len() >= self.limit {
            let now = Instant::now();
            items.retain(|_, item| item.expiration > now);
        }

        // Still full after pruning means we stop caching rather than evict
        if items.len() < self.limit {
            items.insert(
                key,
                CacheItem {
                    value,
                    expiration: Instant::now() + self.ttl,
                },
            );
        }
    }

    /// Drop expired entries
    pub async fn delete_expired(&self) {
        let now = Instant::now();
        self.items
            .lock()
            .await
            .retain(|_, item| item.expiration > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_round_trip() {
        let cache = HttpCache::default();

        let key = cache
            .key("POST", "/v1/swap", br#"{"inputs":[]}"#)
            .unwrap();

        assert!(cache.get(&key).await.is_none());

        cache.set(key, b"response".to_vec()).await;
        assert_eq!(cache.get(&key).await, Some(b"response".to_vec()));

        // Different body, different key
        let other = cache
            .key("POST", "/v1/swap", br#"{"inputs":[1]}"#)
            .unwrap();
        assert_ne!(key, other);
        assert!(cache.get(&other).await.is_none());
    }

    #[tokio::test]
    async fn cache_expires() {
        let cache = HttpCache::new(Duration::from_millis(10), 10);

        let key = cache.key("POST", "/v1/mint/bolt11", b"{}").unwrap();
        cache.set(key, b"response".to_vec()).await;

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn cache_respects_item_limit() {
        let cache = HttpCache::new(Duration::from_secs(60), 2);

        for i in 0..4u8 {
            let key = cache.key("POST", "/v1/swap", &[i]).unwrap();
            cache.set(key, vec![i]).await;
        }

        let items = cache.items.lock().await;
        assert!(items.len() <= 2);
    }

    #[test]
    fn oversized_bodies_not_eligible() {
        let cache = HttpCache::default();

        let body = vec![0u8; REQUEST_BODY_SIZE_LIMIT + 1];
        assert!(cache.key("POST", "/v1/swap", &body).is_none());
    }
}
