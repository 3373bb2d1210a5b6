use crate::error::{AppError, Result};
use crate::idempotency::record::{IdempotencyRecord, IdempotencyStatus};
use crate::idempotency::store::{CreateOutcome, IdempotencyStore};
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub errors: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

/// Redis cache holding completed records, which never change once written.
pub struct RedisRecordCache {
    client: redis::Client,
    key_prefix: String,
}

impl RedisRecordCache {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn make_key(&self, id: &str) -> String {
        format!("{}:record:{}", self.key_prefix, id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<IdempotencyRecord>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)?;

        let value: Option<String> = conn.get(self.make_key(id)).await.map_err(AppError::Redis)?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Stores a completed record until its own expiry. Other records are ignored.
    pub async fn put(&self, record: &IdempotencyRecord) -> Result<()> {
        if !record.is_completed() {
            return Ok(());
        }

        let ttl_seconds = (record.expires_at - Utc::now()).num_seconds();
        if ttl_seconds <= 0 {
            return Ok(());
        }

        let json = serde_json::to_string(record)?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)?;

        let _: () = conn
            .set_ex(self.make_key(&record.id), json, ttl_seconds as u64)
            .await
            .map_err(AppError::Redis)?;

        Ok(())
    }
}

/// Store decorator serving completed records from Redis when possible.
///
/// Cache failures never fail a request: they are logged and the inner store
/// answers instead.
pub struct CachedIdempotencyStore<S> {
    inner: S,
    cache: RedisRecordCache,
    stats: Arc<CacheStats>,
}

impl<S: IdempotencyStore> CachedIdempotencyStore<S> {
    pub fn new(inner: S, cache: RedisRecordCache) -> Self {
        Self {
            inner,
            cache,
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    async fn remember(&self, record: &IdempotencyRecord) {
        if let Err(e) = self.cache.put(record).await {
            self.stats.record_error();
            tracing::warn!("Failed to cache idempotency record {}: {}", record.id, e);
        }
    }
}

#[async_trait]
impl<S: IdempotencyStore> IdempotencyStore for CachedIdempotencyStore<S> {
    async fn create(&self, record: &IdempotencyRecord) -> Result<CreateOutcome> {
        self.inner.create(record).await
    }

    async fn reclaim_failed(&self, record: &IdempotencyRecord) -> Result<CreateOutcome> {
        self.inner.reclaim_failed(record).await
    }

    async fn get(&self, id: &str) -> Result<Option<IdempotencyRecord>> {
        let timer = LatencyTimer::new();
        match self.cache.get(id).await {
            Ok(Some(record)) => {
                self.stats.record_hit();
                get_metrics().record_store_operation("cache_get", timer.elapsed_ms(), true);
                return Ok(Some(record));
            }
            Ok(None) => self.stats.record_miss(),
            Err(e) => {
                self.stats.record_error();
                get_metrics().record_store_operation("cache_get", timer.elapsed_ms(), false);
                tracing::warn!("Idempotency cache read failed for {}: {}", id, e);
            }
        }

        let record = self.inner.get(id).await?;
        if let Some(ref found) = record {
            self.remember(found).await;
        }
        Ok(record)
    }

    async fn update_status(
        &self,
        id: &str,
        status: IdempotencyStatus,
        response_data: Option<Vec<u8>>,
    ) -> Result<IdempotencyRecord> {
        let record = self.inner.update_status(id, status, response_data).await?;
        self.remember(&record).await;
        Ok(record)
    }

    async fn check_duplicate(
        &self,
        user_id: &str,
        endpoint: &str,
        request_hash: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        self.inner.check_duplicate(user_id, endpoint, request_hash).await
    }

    async fn next_sequence_number(&self) -> Result<i64> {
        self.inner.next_sequence_number().await
    }

    async fn delete_expired(&self) -> Result<u64> {
        self.inner.delete_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::key_codec;
    use crate::idempotency::store::InMemoryIdempotencyStore;

    fn unreachable_cache() -> RedisRecordCache {
        let client = redis::Client::open("redis://127.0.0.1:1").unwrap();
        RedisRecordCache::new(client, "idem")
    }

    fn pending_record() -> IdempotencyRecord {
        let key = key_codec::encode("investments", 1).unwrap();
        IdempotencyRecord::pending(
            key.clone(),
            key_codec::decode(&key).unwrap(),
            "member-1",
            "/api/v1/investments",
            "hash",
            3600,
        )
    }

    #[tokio::test]
    async fn test_unreachable_cache_falls_back_to_inner_store() {
        let store =
            CachedIdempotencyStore::new(InMemoryIdempotencyStore::new(), unreachable_cache());
        let record = pending_record();
        assert!(store.create(&record).await.unwrap().is_created());

        // Pending records are never written to the cache, so only the read fails.
        let found = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(found.status, IdempotencyStatus::Pending);
        assert_eq!(store.stats().snapshot().errors, 1);

        let completed = store
            .update_status(&record.id, IdempotencyStatus::Completed, Some(b"{}".to_vec()))
            .await
            .unwrap();
        assert_eq!(completed.status, IdempotencyStatus::Completed);
        assert_eq!(store.stats().snapshot().errors, 2);

        let replayed = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(replayed.response_data.as_deref(), Some(&b"{}"[..]));

        let stats = store.stats().snapshot();
        assert_eq!(stats.errors, 4);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_unreachable_cache_passes_inner_errors_through() {
        let store =
            CachedIdempotencyStore::new(InMemoryIdempotencyStore::new(), unreachable_cache());

        let unknown = "202601010000000001investmentzzzzz";
        let missing = store
            .update_status(unknown, IdempotencyStatus::Failed, None)
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
        assert!(store.get(unknown).await.unwrap().is_none());
        assert_eq!(store.stats().snapshot().errors, 1);
    }

    #[test]
    fn test_cache_key_format() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let cache = RedisRecordCache::new(client, "idem");
        assert_eq!(
            cache.make_key("202601181234000001investmentabcde"),
            "idem:record:202601181234000001investmentabcde"
        );
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_error();
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }
}
