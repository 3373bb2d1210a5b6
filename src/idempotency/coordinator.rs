use crate::error::{AppError, Result};
use crate::idempotency::fingerprint;
use crate::idempotency::key_codec;
use crate::idempotency::record::{
    IdempotencyRecord, IdempotencyRequest, IdempotencyResponse, IdempotencyStatus,
};
use crate::idempotency::store::{CreateOutcome, IdempotencyStore};
use crate::observability::{get_metrics, mask_user_id, LatencyTimer};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-process counters for the coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub total_requests: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub executions: AtomicU64,
    pub completed_executions: AtomicU64,
    pub failed_executions: AtomicU64,
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duplicate(&self) {
        self.duplicate_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completed(&self) {
        self.completed_executions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed_executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            duplicate_requests: self.duplicate_requests.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            completed_executions: self.completed_executions.load(Ordering::Relaxed),
            failed_executions: self.failed_executions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub duplicate_requests: u64,
    pub executions: u64,
    pub completed_executions: u64,
    pub failed_executions: u64,
}

impl StatsSnapshot {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.duplicate_requests as f64 / self.total_requests as f64
        }
    }
}

/// Configuration for the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub ttl_seconds: i64,
    /// Delay between reads while waiting on a `Pending` record.
    pub pending_poll_interval_ms: u64,
    /// Upper bound on the total wait for a `Pending` record to settle.
    pub pending_wait_ms: u64,
    pub operation_timeout_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 86400, // 24 hours
            pending_poll_interval_ms: 100,
            pending_wait_ms: 2000,
            operation_timeout_ms: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn pending_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pending_poll_interval_ms.max(1))
    }

    pub fn pending_wait(&self) -> Duration {
        Duration::from_millis(self.pending_wait_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

/// Runs caller operations at most once per logical request.
///
/// A request is answered from storage when a completed record exists for its
/// fingerprint or its explicit key. Otherwise a `Pending` record is claimed
/// with an atomic insert, the operation runs, and the record is finalized to
/// `Completed` (with the serialized result) or `Failed`.
pub struct IdempotencyCoordinator {
    store: Arc<dyn IdempotencyStore>,
    config: CoordinatorConfig,
    stats: Arc<CoordinatorStats>,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(CoordinatorStats::new()),
        }
    }

    pub fn with_default_config(store: Arc<dyn IdempotencyStore>) -> Self {
        Self::new(store, CoordinatorConfig::default())
    }

    pub fn store(&self) -> Arc<dyn IdempotencyStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<CoordinatorStats> {
        Arc::clone(&self.stats)
    }

    /// Processes `request`, invoking `operation` only when no stored result
    /// can answer it. Errors returned by `operation` are passed through as-is
    /// after the record is marked `Failed`.
    pub async fn process<T, F, Fut>(
        &self,
        request: &IdempotencyRequest,
        operation: F,
    ) -> Result<IdempotencyResponse>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.record_request();
        get_metrics().record_request(&request.endpoint);

        if let Some(key) = &request.idempotency_key {
            key_codec::validate(key)?;
        }

        let request_hash = fingerprint::hash_value(&request.data);

        // The pending wait is spent at most once per call.
        let mut waited = false;
        if let Some(existing) = self
            .store
            .check_duplicate(&request.user_id, &request.endpoint, &request_hash)
            .await?
        {
            waited = existing.is_pending();
            match self.settle(existing).await? {
                Some(done) if done.is_completed() => {
                    return self.replay(&done, &request.endpoint, "hash");
                }
                Some(still) if still.is_pending() => {
                    return Err(AppError::RequestInProgress(still.id));
                }
                _ => {}
            }
        }

        let key = match &request.idempotency_key {
            Some(key) => key.clone(),
            None => {
                let sequence = self.store.next_sequence_number().await?;
                key_codec::encode(&request.table_name, sequence)?
            }
        };
        let decoded = key_codec::decode(&key)?;

        if let Some(existing) = self.store.get(&key).await? {
            ensure_same_request(&existing, request, &request_hash)?;
            let settled = if waited {
                Some(existing)
            } else {
                waited = existing.is_pending();
                self.settle(existing).await?
            };
            match settled {
                Some(done) if done.is_completed() => {
                    return self.replay(&done, &request.endpoint, "key");
                }
                Some(still) if still.is_pending() => {
                    return Err(AppError::RequestInProgress(still.id));
                }
                _ => {}
            }
        }

        let record = IdempotencyRecord::pending(
            key,
            decoded,
            request.user_id.as_str(),
            request.endpoint.as_str(),
            request_hash,
            self.config.ttl_seconds,
        );

        if let Some(replayed) = self.claim(&record, request, waited).await? {
            return Ok(replayed);
        }

        tracing::debug!(
            "Claimed idempotency key {} for user {} on {}",
            record.id,
            mask_user_id(&record.user_id),
            record.endpoint
        );

        self.execute(&record, operation).await
    }

    /// Inserts the pending record. Returns a replayed response when the key
    /// turns out to hold a completed result. `waited` skips a second wait on
    /// a record the caller already waited for.
    async fn claim(
        &self,
        record: &IdempotencyRecord,
        request: &IdempotencyRequest,
        waited: bool,
    ) -> Result<Option<IdempotencyResponse>> {
        let existing = match self.store.create(record).await? {
            CreateOutcome::Created => return Ok(None),
            CreateOutcome::AlreadyExists(existing) => existing,
        };

        ensure_same_request(&existing, request, &record.request_hash)?;

        let settled = if waited {
            Some(existing)
        } else {
            self.settle(existing).await?
        };

        let Some(current) = settled else {
            // The holder was swept while we waited; one more insert decides.
            return match self.store.create(record).await? {
                CreateOutcome::Created => Ok(None),
                CreateOutcome::AlreadyExists(_) => {
                    Err(AppError::RequestInProgress(record.id.clone()))
                }
            };
        };

        match current.status {
            IdempotencyStatus::Completed => {
                self.replay(&current, &request.endpoint, "key").map(Some)
            }
            IdempotencyStatus::Pending => Err(AppError::RequestInProgress(record.id.clone())),
            IdempotencyStatus::Failed => match self.store.reclaim_failed(record).await? {
                CreateOutcome::Created => {
                    tracing::info!("Retrying previously failed idempotency key {}", record.id);
                    Ok(None)
                }
                CreateOutcome::AlreadyExists(latest) if latest.is_completed() => {
                    self.replay(&latest, &request.endpoint, "key").map(Some)
                }
                CreateOutcome::AlreadyExists(_) => {
                    Err(AppError::RequestInProgress(record.id.clone()))
                }
            },
        }
    }

    async fn execute<T, F, Fut>(
        &self,
        record: &IdempotencyRecord,
        operation: F,
    ) -> Result<IdempotencyResponse>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = PendingGuard::new(Arc::clone(&self.store), record.id.clone());
        let timer = LatencyTimer::new();
        self.stats.record_execution();

        let outcome = match self.config.operation_timeout() {
            Some(limit) => tokio::time::timeout(limit, operation())
                .await
                .unwrap_or_else(|_| Err(AppError::Timeout(limit))),
            None => operation().await,
        };
        let serialized =
            outcome.and_then(|value| serde_json::to_vec(&value).map_err(AppError::from));

        match serialized {
            Ok(response_data) => {
                let completed = self
                    .store
                    .update_status(&record.id, IdempotencyStatus::Completed, Some(response_data))
                    .await?;
                guard.disarm();

                self.stats.record_completed();
                get_metrics().record_execution(&record.endpoint, "completed", timer.elapsed_ms());
                tracing::info!("Idempotency key {} completed", record.id);

                IdempotencyResponse::from_completed(&completed, false)
            }
            Err(e) => {
                match self
                    .store
                    .update_status(&record.id, IdempotencyStatus::Failed, None)
                    .await
                {
                    Ok(_) => guard.disarm(),
                    Err(mark_err) => {
                        tracing::error!(
                            "Failed to mark idempotency key {} as failed: {}",
                            record.id,
                            mark_err
                        );
                    }
                }

                self.stats.record_failed();
                get_metrics().record_execution(&record.endpoint, "failed", timer.elapsed_ms());
                tracing::warn!("Idempotency key {} failed: {}", record.id, e);

                Err(e)
            }
        }
    }

    /// Waits for a `Pending` record to reach a terminal status, polling until
    /// the configured bound. Returns `None` if the record disappears.
    async fn settle(&self, record: IdempotencyRecord) -> Result<Option<IdempotencyRecord>> {
        if record.status.is_terminal() {
            return Ok(Some(record));
        }

        let poll = self.config.pending_poll_interval();
        let deadline = tokio::time::Instant::now() + self.config.pending_wait();
        let mut current = record;

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                get_metrics().record_pending_wait("timeout");
                return Ok(Some(current));
            }

            tokio::time::sleep(poll.min(deadline - now)).await;

            match self.store.get(&current.id).await? {
                None => {
                    get_metrics().record_pending_wait("vanished");
                    return Ok(None);
                }
                Some(latest) if latest.status.is_terminal() => {
                    get_metrics().record_pending_wait(latest.status.as_str());
                    return Ok(Some(latest));
                }
                Some(latest) => current = latest,
            }
        }
    }

    fn replay(
        &self,
        record: &IdempotencyRecord,
        endpoint: &str,
        source: &'static str,
    ) -> Result<IdempotencyResponse> {
        self.stats.record_duplicate();
        get_metrics().record_duplicate(endpoint, source);
        tracing::debug!("Replaying stored response for idempotency key {} ({})", record.id, source);

        IdempotencyResponse::from_completed(record, true)
    }
}

fn ensure_same_request(
    existing: &IdempotencyRecord,
    request: &IdempotencyRequest,
    request_hash: &str,
) -> Result<()> {
    if existing.matches(&request.user_id, &request.endpoint, request_hash) {
        Ok(())
    } else {
        Err(AppError::KeyConflict(existing.id.clone()))
    }
}

/// Marks a claimed record `Failed` if the coordinator future is dropped
/// before finalizing it.
struct PendingGuard {
    store: Arc<dyn IdempotencyStore>,
    id: String,
    armed: bool,
}

impl PendingGuard {
    fn new(store: Arc<dyn IdempotencyStore>, id: String) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = Arc::clone(&self.store);
        let id = std::mem::take(&mut self.id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match store.update_status(&id, IdempotencyStatus::Failed, None).await {
                        Ok(_) => {
                            tracing::warn!("Released abandoned idempotency key {} as failed", id)
                        }
                        Err(e) => tracing::error!(
                            "Failed to release abandoned idempotency key {}: {}",
                            id,
                            e
                        ),
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    "No async runtime to release idempotency key {}; it stays pending until it expires",
                    id
                );
            }
        }
    }
}
