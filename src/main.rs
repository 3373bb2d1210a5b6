use coop_idempotency::api::{create_router, AppState};
use coop_idempotency::config::Settings;
use coop_idempotency::idempotency::{
    CachedIdempotencyStore, ExpirationSweeper, IdempotencyCoordinator, IdempotencyStore,
    PostgresIdempotencyStore, RedisRecordCache,
};
use coop_idempotency::observability::{init_logging, init_metrics, HealthChecker};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_logging(&settings.logging.log_config());
    info!("Configuration loaded");

    let metrics_handle = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics exporter disabled: {}", e);
            None
        }
    };

    // Connect to PostgreSQL
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    let idempotency = &settings.idempotency;
    let postgres = PostgresIdempotencyStore::new(pool.clone());
    let mut cache = None;
    let store: Arc<dyn IdempotencyStore> = if idempotency.cache_enabled {
        let client = redis::Client::open(settings.redis.url.as_str())?;
        let record_cache =
            RedisRecordCache::new(client.clone(), idempotency.cache_key_prefix.clone());
        let cached = CachedIdempotencyStore::new(postgres, record_cache);
        cache = Some((client, cached.stats()));
        info!("Idempotency record cache enabled");
        Arc::new(cached)
    } else {
        Arc::new(postgres)
    };

    let sweeper = ExpirationSweeper::new(
        Arc::clone(&store),
        Duration::from_secs(idempotency.sweep_interval_seconds),
    )
    .start();

    let mut health_checker = HealthChecker::new(Arc::clone(&store)).with_database(pool);
    let coordinator = Arc::new(IdempotencyCoordinator::new(
        store,
        idempotency.coordinator_config(),
    ));

    let mut state = AppState::new(coordinator);
    if let Some((client, stats)) = cache {
        health_checker = health_checker.with_cache(client);
        state = state.with_cache_stats(stats);
    }
    state = state.with_health_checker(Arc::new(health_checker));
    if let Some(handle) = metrics_handle {
        state = state.with_metrics(handle);
    }

    let address = settings.application.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
