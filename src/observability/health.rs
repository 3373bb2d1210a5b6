use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::idempotency::IdempotencyStore;
use crate::observability::LatencyTimer;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lookups slower than this report the store as degraded.
const STORE_LATENCY_BUDGET_MS: f64 = 100.0;
const DATABASE_LATENCY_BUDGET_MS: f64 = 100.0;
const CACHE_LATENCY_BUDGET_MS: f64 = 50.0;

/// Well-formed key that the codec never issues (sequence 0 at 2000-01-01).
pub const PROBE_KEY: &str = "200001010000000000healthchkprobe0";

/// Health status of a service or dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Outcome of probing one backing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    /// Healthy within `budget_ms`, degraded above it.
    pub fn from_latency(name: impl Into<String>, latency_ms: f64, budget_ms: f64) -> Self {
        if latency_ms > budget_ms {
            let message = format!("Latency {:.1}ms over {}ms", latency_ms, budget_ms);
            Self {
                latency_ms: Some(latency_ms),
                ..Self::degraded(name, message)
            }
        } else {
            Self::healthy(name, latency_ms)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Caps an outage at `Degraded` for services requests can do without.
    fn optional(mut self) -> Self {
        if self.status.is_unhealthy() {
            self.status = HealthStatus::Degraded;
        }
        self
    }
}

/// Aggregated health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    /// The overall status is the worst dependency status.
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = dependencies
            .iter()
            .map(|d| d.status)
            .max_by_key(|status| match status {
                HealthStatus::Healthy => 0,
                HealthStatus::Degraded => 1,
                HealthStatus::Unhealthy => 2,
            })
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencyHealth> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}

/// Probes what the coordinator depends on.
///
/// The idempotency store is always probed with a lookup of [`PROBE_KEY`], so
/// an in-memory deployment reports health too. The PostgreSQL pool and the
/// Redis record cache are probed when attached. A cache outage only degrades
/// the service because the cached store falls back to its inner store.
pub struct HealthChecker {
    store: Arc<dyn IdempotencyStore>,
    pool: Option<PgPool>,
    cache: Option<redis::Client>,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            pool: None,
            cache: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_database(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_cache(mut self, client: redis::Client) -> Self {
        self.cache = Some(client);
        self
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        let mut dependencies = vec![self.check_store().await];

        if let Some(pool) = &self.pool {
            dependencies.push(check_database(pool).await);
        }
        if let Some(client) = &self.cache {
            dependencies.push(check_cache(client).await);
        }

        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.uptime_seconds(),
            dependencies,
        )
    }

    /// Round-trips a lookup through the store the coordinator uses.
    pub async fn check_store(&self) -> DependencyHealth {
        probe(
            "idempotency_store",
            STORE_LATENCY_BUDGET_MS,
            self.store.get(PROBE_KEY),
        )
        .await
    }

    /// Ready while the store answers lookups; a slow store still serves.
    pub async fn is_ready(&self) -> bool {
        !self.check_store().await.status.is_unhealthy()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

async fn check_database(pool: &PgPool) -> DependencyHealth {
    let health = probe(
        "database",
        DATABASE_LATENCY_BUDGET_MS,
        sqlx::query("SELECT 1").fetch_one(pool),
    )
    .await;

    if health.message.is_some() {
        return health;
    }
    let idle = pool.num_idle();
    health.with_message(format!("{} of {} connections idle", idle, pool.size()))
}

async fn check_cache(client: &redis::Client) -> DependencyHealth {
    let ping = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await
    };

    probe("cache", CACHE_LATENCY_BUDGET_MS, ping).await.optional()
}

async fn probe<T, E, F>(name: &str, budget_ms: f64, check: F) -> DependencyHealth
where
    E: Display,
    F: Future<Output = std::result::Result<T, E>>,
{
    let timer = LatencyTimer::new();

    match tokio::time::timeout(PROBE_TIMEOUT, check).await {
        Ok(Ok(_)) => DependencyHealth::from_latency(name, timer.elapsed_ms(), budget_ms),
        Ok(Err(e)) => DependencyHealth::unhealthy(name, format!("Probe failed: {}", e)),
        Err(_) => DependencyHealth::unhealthy(name, "Probe timed out"),
    }
}
