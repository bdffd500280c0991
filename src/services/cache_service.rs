/*
 * Two-level search cache: a fast ephemeral Redis layer (L1, optional) in front
 * of the durable book_search_cache table (L2, required), keyed by a
 * provider-independent query fingerprint.
 * I'm implementing intelligent cache layering with stampede protection and
 * graceful degradation when the fast layer is absent or unreachable.
 *
 * L1 may be absent or degraded; the manager then serves L2 only. L1 write
 * failures are logged and swallowed; L2 failures propagate. Neither layer ever
 * returns an entry past its stored TTL through `get` (stale rows are reachable
 * only through `get_stale`).
 */

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::database::repositories::SearchCacheRepository;
use crate::models::search::{CacheLayer, CachedResults, SearchResult, SearchType};
use crate::utils::error::{AppError, Result};

/// Stampede lock lease; a crashed fetcher's lock expires on its own.
pub const LOCK_LEASE: Duration = Duration::from_secs(10);

/// Compute the provider-independent search key:
/// `hex(sha256(canonical_json({q, type, filters})))` with lowercased, trimmed
/// query and sorted filters.
/// I'm implementing consistent key derivation that is stable across runs.
pub fn compute_search_key(
    query: &str,
    search_type: SearchType,
    filters: &BTreeMap<String, String>,
) -> String {
    // serde_json maps serialize with sorted keys, which makes this canonical.
    let canonical = serde_json::json!({
        "q": query.trim().to_lowercase(),
        "type": search_type.as_str(),
        "filters": filters,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Payload stored in L1
/// I'm carrying the expiry inside the entry so a hit is validated against the
/// stored TTL even if the Redis key outlived it
#[derive(Debug, Serialize, Deserialize)]
struct L1Entry {
    provider: String,
    results: Vec<SearchResult>,
    result_count: i64,
    /// L2 row expiry, surfaced to callers.
    l2_expires_at: DateTime<Utc>,
    /// L1 expiry for the stored-TTL check.
    l1_expires_at: DateTime<Utc>,
}

/// Fast ephemeral cache layer over Redis
/// I'm implementing intelligent connection pooling with a lazily-built
/// connection manager and automatic recovery
#[derive(Clone)]
pub struct L1Cache {
    client: redis::Client,
    key_prefix: String,
    connection: Arc<RwLock<Option<redis::aio::ConnectionManager>>>,
}

impl std::fmt::Debug for L1Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L1Cache")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl L1Cache {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            key_prefix: "shelfmark:".to_string(),
            connection: Arc::new(RwLock::new(None)),
        }
    }

    async fn get_connection(&self) -> Result<redis::aio::ConnectionManager> {
        {
            let guard = self.connection.read().await;
            if let Some(manager) = guard.as_ref() {
                return Ok(manager.clone());
            }
        }

        let mut guard = self.connection.write().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }

        let manager = redis::aio::ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| AppError::CacheError(format!("failed to connect L1 cache: {}", e)))?;
        info!("Created new L1 cache connection manager");
        *guard = Some(manager.clone());
        Ok(manager)
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_entry(&self, key: &str) -> Result<Option<L1Entry>> {
        let full_key = self.build_key(key);
        let mut conn = self.get_connection().await?;

        let raw: Option<String> = conn.get(&full_key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<L1Entry>(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("Dropping corrupt L1 entry {}: {}", full_key, e);
                let _: std::result::Result<i32, _> = conn.del(&full_key).await;
                Ok(None)
            }
        }
    }

    async fn set_entry(&self, key: &str, entry: &L1Entry, ttl: Duration) -> Result<()> {
        let full_key = self.build_key(key);
        let serialized = serde_json::to_string(entry)?;
        let mut conn = self.get_connection().await?;

        debug!("L1 SET: {} (TTL: {}s)", full_key, ttl.as_secs());
        conn.set_ex::<_, _, ()>(&full_key, serialized, ttl.as_secs())
            .await?;
        Ok(())
    }

    /// Set-if-absent with a lease, the primitive behind the stampede lock
    /// I'm leaning on the native SET NX PX operation so acquisition is atomic
    async fn set_if_absent(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let full_key = self.build_key(key);
        let mut conn = self.get_connection().await?;

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.build_key(key);
        let mut conn = self.get_connection().await?;
        let deleted: i32 = conn.del(&full_key).await?;
        Ok(deleted > 0)
    }

    /// Connectivity probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(AppError::CacheError(
                "L1 ping returned unexpected response".to_string(),
            ))
        }
    }
}

/// Outcome of a stampede-lock attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// This caller is the fetcher; release the lock after the cache write.
    Acquired(StampedeLock),
    /// Another worker holds the lease.
    Busy,
    /// L1 absent or unreachable; stampede protection is a no-op.
    Unavailable,
}

/// Held stampede lock. Released explicitly in a deferred path after the cache
/// set completes, success or failure; the lease bounds the worst case.
#[derive(Debug)]
pub struct StampedeLock {
    key: String,
}

/// Two-layer cache manager
/// I'm implementing the L1-then-L2 read path with asynchronous backfill and
/// last-writer-wins semantics on the durable layer
#[derive(Debug, Clone)]
pub struct CacheManager {
    l1: Option<L1Cache>,
    l2: SearchCacheRepository,
    l1_ttl: Duration,
    l2_ttl: Duration,
    l1_degraded: Arc<AtomicBool>,
}

impl CacheManager {
    pub fn new(
        l1: Option<L1Cache>,
        l2: SearchCacheRepository,
        l1_ttl: Duration,
        l2_ttl: Duration,
    ) -> Self {
        if l1.is_none() {
            info!("L1 cache not configured; running in degraded-L1 mode");
        }
        Self {
            l1,
            l2,
            l1_ttl,
            l2_ttl,
            l1_degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn l1_present(&self) -> bool {
        self.l1.is_some()
    }

    pub fn l1_cache(&self) -> Option<&L1Cache> {
        self.l1.as_ref()
    }

    /// Get from L1 then L2
    /// I'm backfilling a fresh L2 hit into L1 asynchronously so the next read
    /// is sub-millisecond
    pub async fn get(&self, search_key: &str, provider: &str) -> Result<Option<CachedResults>> {
        let entry_key = entry_key(search_key, provider);

        if let Some(l1) = &self.l1 {
            match l1.get_entry(&entry_key).await {
                Ok(Some(entry)) if entry.l1_expires_at > Utc::now() => {
                    self.l1_recovered();
                    debug!("L1 hit: {}", entry_key);
                    return Ok(Some(CachedResults {
                        results: entry.results,
                        provider: entry.provider,
                        result_count: entry.result_count,
                        expires_at: entry.l2_expires_at,
                        layer: CacheLayer::L1,
                    }));
                }
                Ok(Some(_)) => {
                    // Entry outlived its stored TTL; treat as a miss.
                    let _ = l1.delete(&entry_key).await;
                }
                Ok(None) => {}
                Err(e) => self.l1_degraded_once(&e),
            }
        }

        let row = self.l2.get_fresh(search_key, provider).await?;
        let Some(row) = row else {
            return Ok(None);
        };

        debug!("L2 hit: {}", entry_key);
        self.backfill_l1(entry_key, &row);

        Ok(Some(CachedResults {
            results: row.results,
            provider: row.provider,
            result_count: row.result_count,
            expires_at: row.expires_at,
            layer: CacheLayer::L2,
        }))
    }

    /// Write both layers
    /// I'm treating L2 as authoritative (its failure propagates) while an L1
    /// failure only degrades
    pub async fn set(
        &self,
        search_key: &str,
        provider: &str,
        results: &[SearchResult],
    ) -> Result<DateTime<Utc>> {
        let l2_expires_at = Utc::now() + chrono::Duration::from_std(self.l2_ttl).unwrap_or_default();
        self.l2
            .upsert(search_key, provider, results, l2_expires_at)
            .await?;

        if let Some(l1) = &self.l1 {
            let entry = L1Entry {
                provider: provider.to_string(),
                results: results.to_vec(),
                result_count: results.len() as i64,
                l2_expires_at,
                l1_expires_at: Utc::now()
                    + chrono::Duration::from_std(self.l1_ttl).unwrap_or_default(),
            };
            if let Err(e) = l1
                .set_entry(&entry_key(search_key, provider), &entry, self.l1_ttl)
                .await
            {
                self.l1_degraded_once(&e);
            } else {
                self.l1_recovered();
            }
        }

        Ok(l2_expires_at)
    }

    /// L2 entry regardless of expiry
    /// I'm exposing stale rows only to the degraded-fallback path
    pub async fn get_stale(&self, search_key: &str, provider: &str) -> Result<Option<CachedResults>> {
        let row = self.l2.get_stale(search_key, provider).await?;
        Ok(row.map(|row| CachedResults {
            results: row.results,
            provider: row.provider,
            result_count: row.result_count,
            expires_at: row.expires_at,
            layer: CacheLayer::L2,
        }))
    }

    /// Attempt the stampede lock for a key+provider via L1 set-if-absent
    /// I'm making this a no-op when L1 is absent; low concurrent traffic makes
    /// that acceptable
    pub async fn acquire_lock(&self, search_key: &str, provider: &str) -> LockAttempt {
        let Some(l1) = &self.l1 else {
            return LockAttempt::Unavailable;
        };

        let lock_key = lock_key(search_key, provider);
        let token = uuid::Uuid::new_v4().to_string();

        match l1.set_if_absent(&lock_key, &token, LOCK_LEASE).await {
            Ok(true) => LockAttempt::Acquired(StampedeLock { key: lock_key }),
            Ok(false) => LockAttempt::Busy,
            Err(e) => {
                self.l1_degraded_once(&e);
                LockAttempt::Unavailable
            }
        }
    }

    /// Deferred lock release after the cache write completed, success or failure
    /// I'm only logging release failures; the lease expiry bounds the worst case
    pub async fn release_lock(&self, lock: StampedeLock) {
        if let Some(l1) = &self.l1 {
            if let Err(e) = l1.delete(&lock.key).await {
                warn!("Failed to release stampede lock {}: {}", lock.key, e);
            }
        }
    }

    fn backfill_l1(&self, entry_key: String, row: &crate::database::repositories::CachedSearchRow) {
        let Some(l1) = self.l1.clone() else {
            return;
        };
        let entry = L1Entry {
            provider: row.provider.clone(),
            results: row.results.clone(),
            result_count: row.result_count,
            l2_expires_at: row.expires_at,
            l1_expires_at: Utc::now() + chrono::Duration::from_std(self.l1_ttl).unwrap_or_default(),
        };
        let ttl = self.l1_ttl;
        tokio::spawn(async move {
            if let Err(e) = l1.set_entry(&entry_key, &entry, ttl).await {
                debug!("L1 backfill failed for {}: {}", entry_key, e);
            }
        });
    }

    /// Log L1 degradation once per state change, not per operation
    /// I'm keeping the log quiet while degraded to avoid per-request noise
    fn l1_degraded_once(&self, err: &AppError) {
        if !self.l1_degraded.swap(true, Ordering::SeqCst) {
            warn!("L1 cache degraded, continuing against L2 only: {}", err);
        }
    }

    fn l1_recovered(&self) {
        if self.l1_degraded.swap(false, Ordering::SeqCst) {
            info!("L1 cache recovered");
        }
    }
}

fn entry_key(search_key: &str, provider: &str) -> String {
    format!("search:{}:{}", search_key, provider)
}

fn lock_key(search_key: &str, provider: &str) -> String {
    format!("lock:search:{}:{}", search_key, provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_key_is_stable_and_canonical() {
        let mut filters = BTreeMap::new();
        filters.insert("limit".to_string(), "20".to_string());
        filters.insert("offset".to_string(), "0".to_string());

        let a = compute_search_key("1984 Orwell", SearchType::General, &filters);
        let b = compute_search_key("  1984 ORWELL  ", SearchType::General, &filters);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_search_key_varies_by_type_and_filters() {
        let filters = BTreeMap::new();
        let general = compute_search_key("dune", SearchType::General, &filters);
        let title = compute_search_key("dune", SearchType::Title, &filters);
        assert_ne!(general, title);

        let mut paged = BTreeMap::new();
        paged.insert("offset".to_string(), "20".to_string());
        let offset = compute_search_key("dune", SearchType::General, &paged);
        assert_ne!(general, offset);
    }

    #[test]
    fn test_search_key_independent_of_provider() {
        // The key derives from the query alone; provider scoping happens in the
        // cache row, not the key.
        let filters = BTreeMap::new();
        let key = compute_search_key("foundation", SearchType::General, &filters);
        assert!(!key.contains("primary"));
        assert!(!key.contains("secondary"));
    }

    #[test]
    fn test_entry_and_lock_keys_are_namespaced() {
        assert_eq!(entry_key("abc", "primary"), "search:abc:primary");
        assert_eq!(lock_key("abc", "primary"), "lock:search:abc:primary");
    }

    // L1/L2 round-trip behavior is exercised against live Redis and Postgres.

    #[tokio::test]
    #[ignore] // Requires a Redis instance
    async fn test_l1_round_trip() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let l1 = L1Cache::new(client);

        let entry = L1Entry {
            provider: "primary".to_string(),
            results: vec![],
            result_count: 0,
            l2_expires_at: Utc::now() + chrono::Duration::days(30),
            l1_expires_at: Utc::now() + chrono::Duration::hours(12),
        };

        l1.set_entry("search:test:primary", &entry, Duration::from_secs(60))
            .await
            .unwrap();
        let read = l1.get_entry("search:test:primary").await.unwrap();
        assert!(read.is_some());

        l1.delete("search:test:primary").await.unwrap();
        assert!(l1.get_entry("search:test:primary").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires a Redis instance
    async fn test_stampede_lock_is_exclusive() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let l1 = L1Cache::new(client);

        let first = l1
            .set_if_absent("lock:search:x:primary", "a", LOCK_LEASE)
            .await
            .unwrap();
        let second = l1
            .set_if_absent("lock:search:x:primary", "b", LOCK_LEASE)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);

        l1.delete("lock:search:x:primary").await.unwrap();
    }
}
