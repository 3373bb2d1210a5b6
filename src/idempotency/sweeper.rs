use crate::error::Result;
use crate::idempotency::store::IdempotencyStore;
use crate::observability::get_metrics;
use std::sync::Arc;
use std::time::Duration;

/// Background job deleting expired idempotency records.
///
/// Holds no state besides the store handle, so any number of sweepers may run
/// against the same store.
pub struct ExpirationSweeper {
    store: Arc<dyn IdempotencyStore>,
    interval: Duration,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<dyn IdempotencyStore>, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs the sweep once.
    pub async fn run_once(&self) -> Result<u64> {
        let start = std::time::Instant::now();
        let result = self.store.delete_expired().await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        get_metrics().record_store_operation("delete_expired", duration_ms, result.is_ok());
        if let Ok(count) = result {
            get_metrics().record_sweep(count);
        }
        result
    }

    /// Starts the sweeper in a background task. Abort the handle to stop it.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Cleaned up {} expired idempotency records", count);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to cleanup expired idempotency records: {}", e);
                    }
                }
            }
        })
    }
}
