pub mod cache;
pub mod coordinator;
pub mod fingerprint;
pub mod key_codec;
pub mod postgres;
pub mod record;
pub mod store;
pub mod sweeper;

pub use cache::{CacheStats, CacheStatsSnapshot, CachedIdempotencyStore, RedisRecordCache};
pub use coordinator::{CoordinatorConfig, CoordinatorStats, IdempotencyCoordinator, StatsSnapshot};
pub use key_codec::DecodedKey;
pub use postgres::PostgresIdempotencyStore;
pub use record::{IdempotencyRecord, IdempotencyRequest, IdempotencyResponse, IdempotencyStatus};
pub use store::{CreateOutcome, IdempotencyStore, InMemoryIdempotencyStore};
pub use sweeper::ExpirationSweeper;
