pub mod handler;
pub mod key_generator;
pub mod middleware;
pub mod policy;
pub mod storage;

pub use handler::{
    CapturableOutcome, Execution, IdempotencyCheckResult, IdempotencyCleanupJob,
    IdempotencyHandler, IdempotencyMetrics, MetricsSnapshot,
};
pub use key_generator::{CompositeKey, IdempotencyKeyGenerator, KeyGeneratorConfig};
pub use middleware::{
    idempotency_middleware, replay_response, IdempotencyLayer, IDEMPOTENCY_KEY_HEADER,
    REPLAYED_HEADER,
};
pub use policy::{
    ExpiryPolicy, IdempotencyPolicy, IdempotencyRegistry, InFlightPolicy, StoreFailurePolicy,
};
pub use storage::{
    CacheEntry, CachedResponse, EntryState, IdempotencyStore, InMemoryIdempotencyStore,
    RedisIdempotencyStore, Reservation, ReserveOutcome,
};
