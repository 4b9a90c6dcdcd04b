use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::idempotency::key_generator::{CompositeKey, IdempotencyKeyGenerator};
use crate::idempotency::policy::{IdempotencyPolicy, InFlightPolicy, StoreFailurePolicy};
use crate::idempotency::storage::{
    CacheEntry, CachedResponse, EntryState, IdempotencyStore, Reservation, ReserveOutcome,
};
use crate::observability::{get_metrics, mask_sensitive};

/// Metrics for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub new_requests: AtomicU64,
    pub in_flight_conflicts: AtomicU64,
    pub completed_requests: AtomicU64,
    pub released_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub store_errors: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("replayed");
    }

    pub fn record_new(&self) {
        self.new_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("executed");
    }

    pub fn record_in_flight(&self) {
        self.in_flight_conflicts.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("in_flight");
    }

    pub fn record_completed(&self) {
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("captured");
    }

    pub fn record_released(&self) {
        self.released_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("released");
    }

    pub fn record_failed(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("handler_failed");
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("store_error");
    }

    pub fn duplicate_rate(&self) -> f64 {
        self.snapshot().duplicate_rate()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            duplicate_requests: self.duplicate_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
            in_flight_conflicts: self.in_flight_conflicts.load(Ordering::Relaxed),
            completed_requests: self.completed_requests.load(Ordering::Relaxed),
            released_requests: self.released_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub duplicate_requests: u64,
    pub new_requests: u64,
    pub in_flight_conflicts: u64,
    pub completed_requests: u64,
    pub released_requests: u64,
    pub failed_requests: u64,
    pub store_errors: u64,
}

impl MetricsSnapshot {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.duplicate_requests as f64 / self.total_requests as f64
        }
    }
}

/// Result of an idempotency check.
#[derive(Debug)]
pub enum IdempotencyCheckResult {
    /// New request; the reservation is held by the caller
    New(Reservation),
    /// Duplicate request with cached response
    Duplicate(CachedResponse),
    /// Duplicate request still processing
    Processing,
}

/// Outcome of running a request through the pipeline.
#[derive(Debug)]
pub enum Execution<T> {
    /// The operation ran and produced this output.
    Executed(T),
    /// The operation was skipped; this is the captured output of an earlier run.
    Replayed(CachedResponse),
}

/// A handler result that the pipeline can inspect and capture.
pub trait CapturableOutcome {
    fn status_code(&self) -> u16;
    fn to_cached_response(&self) -> CachedResponse;
}

impl CapturableOutcome for CachedResponse {
    fn status_code(&self) -> u16 {
        self.status_code
    }

    fn to_cached_response(&self) -> CachedResponse {
        self.clone()
    }
}

/// Releases a reservation when dropped while still armed.
///
/// Covers panics and cancellation of the request future anywhere between reservation
/// and the store acknowledging `complete` or `release`.
struct ReservationGuard {
    store: Arc<dyn IdempotencyStore>,
    reservation: Reservation,
    armed: bool,
}

impl ReservationGuard {
    fn new(store: Arc<dyn IdempotencyStore>, reservation: Reservation) -> Self {
        Self {
            store,
            reservation,
            armed: true,
        }
    }

    fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = Arc::clone(&self.store);
        let reservation = self.reservation.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match store.release(&reservation).await {
                        Ok(_) => tracing::debug!(
                            key = %mask_sensitive(reservation.key.idempotency_key(), 2),
                            "Released reservation of cancelled request"
                        ),
                        Err(e) => tracing::warn!("Failed to release cancelled reservation: {}", e),
                    }
                });
            }
            Err(_) => tracing::warn!(
                "No runtime available to release reservation; it will lapse with its lease"
            ),
        }
    }
}

/// Handler for idempotent request processing.
pub struct IdempotencyHandler {
    store: Arc<dyn IdempotencyStore>,
    key_generator: IdempotencyKeyGenerator,
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotencyHandler {
    pub fn new(store: Arc<dyn IdempotencyStore>, key_generator: IdempotencyKeyGenerator) -> Self {
        Self {
            store,
            key_generator,
            metrics: Arc::new(IdempotencyMetrics::new()),
        }
    }

    /// Gets the metrics for this handler.
    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn store(&self) -> Arc<dyn IdempotencyStore> {
        Arc::clone(&self.store)
    }

    pub fn key_generator(&self) -> &IdempotencyKeyGenerator {
        &self.key_generator
    }

    /// Builds the composite key for a verified client and raw header value.
    pub fn composite_key(&self, client_id: &str, header_value: &str) -> Result<CompositeKey> {
        self.key_generator.composite(client_id, header_value)
    }

    /// Reserves the key or reports what already holds it.
    pub async fn check(
        &self,
        key: &CompositeKey,
        policy: &IdempotencyPolicy,
        request_fingerprint: Option<String>,
    ) -> Result<IdempotencyCheckResult> {
        let outcome = self
            .store
            .try_reserve(key, policy.expiry.reservation_ttl, request_fingerprint.clone())
            .await?;

        match outcome {
            ReserveOutcome::Reserved(reservation) => Ok(IdempotencyCheckResult::New(reservation)),
            ReserveOutcome::Existing(existing) => {
                verify_fingerprint(policy, &existing, request_fingerprint.as_deref())?;
                match existing.state {
                    EntryState::Completed => existing
                        .payload
                        .map(IdempotencyCheckResult::Duplicate)
                        .ok_or_else(|| {
                            AppError::Internal(anyhow::anyhow!(
                                "Completed idempotency entry has no payload"
                            ))
                        }),
                    EntryState::Reserved => match policy.in_flight {
                        InFlightPolicy::Reject => Ok(IdempotencyCheckResult::Processing),
                        InFlightPolicy::Wait {
                            timeout,
                            poll_interval,
                        } => {
                            self.wait_for_resolution(key, policy, request_fingerprint, timeout, poll_interval)
                                .await
                        }
                    },
                }
            }
        }
    }

    async fn wait_for_resolution(
        &self,
        key: &CompositeKey,
        policy: &IdempotencyPolicy,
        request_fingerprint: Option<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<IdempotencyCheckResult> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            tokio::time::sleep(poll_interval).await;

            match self.store.get(key).await? {
                Some(entry) if entry.is_reserved() => continue,
                Some(entry) => {
                    return entry
                        .payload
                        .map(IdempotencyCheckResult::Duplicate)
                        .ok_or_else(|| {
                            AppError::Internal(anyhow::anyhow!(
                                "Completed idempotency entry has no payload"
                            ))
                        });
                }
                None => {
                    // The earlier attempt released its key; this request becomes a fresh attempt.
                    return match self
                        .store
                        .try_reserve(key, policy.expiry.reservation_ttl, request_fingerprint.clone())
                        .await?
                    {
                        ReserveOutcome::Reserved(reservation) => {
                            Ok(IdempotencyCheckResult::New(reservation))
                        }
                        ReserveOutcome::Existing(existing) => {
                            verify_fingerprint(policy, &existing, request_fingerprint.as_deref())?;
                            match existing.payload {
                                Some(payload) if existing.is_completed() => {
                                    Ok(IdempotencyCheckResult::Duplicate(payload))
                                }
                                _ => Ok(IdempotencyCheckResult::Processing),
                            }
                        }
                    };
                }
            }
        }

        Ok(IdempotencyCheckResult::Processing)
    }

    /// Stores the outcome of a reserved request for replay.
    pub async fn complete(
        &self,
        reservation: &Reservation,
        response: CachedResponse,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let entry = self.store.complete(reservation, response, ttl).await?;
        self.metrics.record_completed();
        Ok(entry)
    }

    /// Gives a reserved key back so the same key can be retried.
    pub async fn release(&self, reservation: &Reservation) -> Result<bool> {
        let released = self.store.release(reservation).await?;
        self.metrics.record_released();
        Ok(released)
    }

    /// Executes an operation with idempotency handling.
    /// This is the main entry point for idempotent request processing.
    pub async fn execute<T, F, Fut>(
        &self,
        key: &CompositeKey,
        policy: &IdempotencyPolicy,
        request_fingerprint: Option<String>,
        mut operation: F,
    ) -> Result<Execution<T>>
    where
        T: CapturableOutcome,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.metrics.record_request();

        let check = match self.check(key, policy, request_fingerprint).await {
            Ok(check) => check,
            Err(e) if is_store_failure(&e) => {
                self.metrics.record_store_error();
                return match policy.store_failure {
                    StoreFailurePolicy::FailClosed => {
                        tracing::error!("Idempotency store unavailable, rejecting request: {}", e);
                        Err(e)
                    }
                    StoreFailurePolicy::FailOpen => {
                        tracing::warn!(
                            "Idempotency store unavailable, executing without deduplication: {}",
                            e
                        );
                        let outcome = run_with_retries(policy, &mut operation).await?;
                        Ok(Execution::Executed(outcome))
                    }
                };
            }
            Err(e) => return Err(e),
        };

        let reservation = match check {
            IdempotencyCheckResult::Duplicate(response) => {
                self.metrics.record_duplicate();
                tracing::info!(
                    client_id = %key.client_id(),
                    key = %mask_sensitive(key.idempotency_key(), 2),
                    status = response.status_code,
                    "Replaying captured response"
                );
                return Ok(Execution::Replayed(response));
            }
            IdempotencyCheckResult::Processing => {
                self.metrics.record_in_flight();
                return Err(AppError::ConcurrentInFlight);
            }
            IdempotencyCheckResult::New(reservation) => reservation,
        };

        self.metrics.record_new();
        // Stays armed until the store has acknowledged the final transition.
        let mut guard = ReservationGuard::new(Arc::clone(&self.store), reservation);
        let result = run_with_retries(policy, &mut operation).await;

        let result = match result {
            Ok(outcome) if policy.should_capture(outcome.status_code()) => {
                if let Err(e) = self
                    .complete(guard.reservation(), outcome.to_cached_response(), policy.expiry.ttl)
                    .await
                {
                    tracing::error!("Failed to mark idempotency key as completed: {}", e);
                    self.release_quietly(guard.reservation()).await;
                }
                Ok(Execution::Executed(outcome))
            }
            Ok(outcome) => {
                tracing::debug!(
                    status = outcome.status_code(),
                    "Outcome not capturable, releasing idempotency key"
                );
                self.release_quietly(guard.reservation()).await;
                Ok(Execution::Executed(outcome))
            }
            Err(e) => {
                self.metrics.record_failed();
                self.release_quietly(guard.reservation()).await;
                Err(e)
            }
        };

        guard.disarm();
        result
    }

    async fn release_quietly(&self, reservation: &Reservation) {
        if let Err(e) = self.release(reservation).await {
            tracing::error!("Failed to release idempotency key: {}", e);
        }
    }

    /// Runs cleanup of expired idempotency entries.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let purged = self.store.purge_expired().await?;
        if let Ok(count) = self.store.entry_count().await {
            get_metrics().set_store_entries(count);
        }
        Ok(purged)
    }
}

fn is_store_failure(error: &AppError) -> bool {
    matches!(error, AppError::StoreUnavailable(_) | AppError::Redis(_))
}

fn verify_fingerprint(
    policy: &IdempotencyPolicy,
    existing: &CacheEntry,
    request_fingerprint: Option<&str>,
) -> Result<()> {
    if !policy.verify_fingerprint {
        return Ok(());
    }
    match (existing.request_fingerprint.as_deref(), request_fingerprint) {
        (Some(stored), Some(incoming)) if stored != incoming => Err(AppError::IdempotencyKeyReused),
        _ => Ok(()),
    }
}

/// Runs the operation, retrying errors and 5xx outcomes up to the policy's bound.
async fn run_with_retries<T, F, Fut>(policy: &IdempotencyPolicy, operation: &mut F) -> Result<T>
where
    T: CapturableOutcome,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let result = operation().await;
        let retryable = match &result {
            Ok(outcome) => outcome.status_code() >= 500,
            Err(_) => true,
        };
        if !retryable || attempt >= policy.handler_retries {
            return result;
        }

        attempt += 1;
        tracing::warn!(
            attempt,
            max_retries = policy.handler_retries,
            "Handler attempt failed, retrying"
        );
        tokio::time::sleep(policy.retry_delay).await;
    }
}

/// Background cleanup job for expired idempotency entries.
pub struct IdempotencyCleanupJob {
    handler: Arc<IdempotencyHandler>,
    interval_seconds: u64,
}

impl IdempotencyCleanupJob {
    pub fn new(handler: Arc<IdempotencyHandler>, interval_seconds: u64) -> Self {
        Self {
            handler,
            interval_seconds,
        }
    }

    /// Runs the cleanup job once.
    pub async fn run_once(&self) -> Result<u64> {
        self.handler.cleanup_expired().await
    }

    /// Starts the cleanup job in a background task that ends when `shutdown` flips to true.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_seconds.max(1)));

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => {
                        tracing::info!("Idempotency cleanup job stopping");
                        return;
                    }
                }

                match self.handler.cleanup_expired().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Cleaned up {} expired idempotency entries", count);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to cleanup expired idempotency entries: {}", e);
                    }
                }
            }
        })
    }
}
