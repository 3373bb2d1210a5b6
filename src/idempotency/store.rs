use crate::error::{AppError, Result};
use crate::idempotency::record::{IdempotencyRecord, IdempotencyStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// Result of an atomic insert-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created,
    /// Another record already holds the id; carries that record as stored.
    AlreadyExists(IdempotencyRecord),
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created)
    }
}

/// Persistence contract consumed by the coordinator.
///
/// Implementations must make `create` and `reclaim_failed` atomic with respect
/// to concurrent callers, and `next_sequence_number` must be an atomic
/// store-level increment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Inserts a new record unless its id is taken.
    async fn create(&self, record: &IdempotencyRecord) -> Result<CreateOutcome>;

    /// Replaces an existing `Failed` record with `record`, or inserts it when
    /// the id is free. Any other existing record is returned untouched.
    async fn reclaim_failed(&self, record: &IdempotencyRecord) -> Result<CreateOutcome>;

    async fn get(&self, id: &str) -> Result<Option<IdempotencyRecord>>;

    /// Finalizes a `Pending` record. Fails with `NotFound` for unknown ids and
    /// `InvalidTransition` when the record is already terminal.
    async fn update_status(
        &self,
        id: &str,
        status: IdempotencyStatus,
        response_data: Option<Vec<u8>>,
    ) -> Result<IdempotencyRecord>;

    /// Most recent record for the triple, whatever its status.
    async fn check_duplicate(
        &self,
        user_id: &str,
        endpoint: &str,
        request_hash: &str,
    ) -> Result<Option<IdempotencyRecord>>;

    async fn next_sequence_number(&self) -> Result<i64>;

    /// Deletes every record whose `expires_at` has passed, returning the count.
    async fn delete_expired(&self) -> Result<u64>;
}

/// Rejects a finalization target that is not terminal.
pub(crate) fn ensure_terminal_target(id: &str, status: IdempotencyStatus) -> Result<()> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            id: id.to_string(),
            from: IdempotencyStatus::Pending,
            to: status,
        })
    }
}

/// Process-local store backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
    sequence: AtomicI64,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Writes `record` unconditionally. Intended for seeding fixtures.
    pub async fn insert_raw(&self, record: IdempotencyRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn create(&self, record: &IdempotencyRecord) -> Result<CreateOutcome> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.id) {
            return Ok(CreateOutcome::AlreadyExists(existing.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(CreateOutcome::Created)
    }

    async fn reclaim_failed(&self, record: &IdempotencyRecord) -> Result<CreateOutcome> {
        let mut records = self.records.write().await;
        match records.get(&record.id) {
            Some(existing) if !existing.is_failed() => {
                Ok(CreateOutcome::AlreadyExists(existing.clone()))
            }
            _ => {
                records.insert(record.id.clone(), record.clone());
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &str,
        status: IdempotencyStatus,
        response_data: Option<Vec<u8>>,
    ) -> Result<IdempotencyRecord> {
        ensure_terminal_target(id, status)?;

        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Idempotency key {} not found", id)))?;

        if !record.status.can_transition_to(status) {
            return Err(AppError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        record.response_data = match status {
            IdempotencyStatus::Completed => response_data,
            _ => None,
        };
        Ok(record.clone())
    }

    async fn check_duplicate(
        &self,
        user_id: &str,
        endpoint: &str,
        request_hash: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let records = self.records.read().await;
        let latest = records
            .values()
            .filter(|r| r.matches(user_id, endpoint, request_hash))
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then(a.sequence_number.cmp(&b.sequence_number))
            })
            .cloned();
        Ok(latest)
    }

    async fn next_sequence_number(&self) -> Result<i64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}
