use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::idempotency::key_generator::{CompositeKey, IdempotencyKeyGenerator};
use crate::observability::get_metrics;

/// State of an idempotency entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Reserved,
    Completed,
}

/// Captured handler outcome, replayed verbatim on duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status_code: u16, content_type: Option<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            content_type,
            body: body.into(),
        }
    }
}

/// Stored idempotency entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub reservation_id: Uuid,
    pub state: EntryState,
    pub payload: Option<CachedResponse>,
    pub request_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: i64,
}

impl CacheEntry {
    fn reserved(lease: Duration, request_fingerprint: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            reservation_id: Uuid::new_v4(),
            state: EntryState::Reserved,
            payload: None,
            request_fingerprint,
            created_at: now,
            ttl_ms: duration_ms(lease),
        }
    }

    fn completed(mut self, payload: CachedResponse, ttl: Duration, now: DateTime<Utc>) -> Self {
        self.state = EntryState::Completed;
        self.payload = Some(payload);
        self.created_at = now;
        self.ttl_ms = duration_ms(ttl);
        self
    }

    /// Saturates at the latest representable instant instead of overflowing.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::try_milliseconds(self.ttl_ms)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_completed(&self) -> bool {
        self.state == EntryState::Completed
    }

    pub fn is_reserved(&self) -> bool {
        self.state == EntryState::Reserved
    }

    fn owned_by(&self, reservation: &Reservation) -> bool {
        self.state == EntryState::Reserved && self.reservation_id == reservation.reservation_id
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Proof that the holder won `try_reserve` for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub key: CompositeKey,
    pub reservation_id: Uuid,
}

/// Result of `try_reserve`.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    /// The caller now owns the key and must execute, then complete or release.
    Reserved(Reservation),
    /// A live entry already exists; the caller must not execute.
    Existing(CacheEntry),
}

/// Storage contract for idempotency entries.
///
/// Implementations must make `try_reserve` atomic per key: among concurrent callers
/// with the same key and no live entry, exactly one receives `Reserved`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn try_reserve(
        &self,
        key: &CompositeKey,
        lease: Duration,
        request_fingerprint: Option<String>,
    ) -> Result<ReserveOutcome>;

    async fn complete(
        &self,
        reservation: &Reservation,
        payload: CachedResponse,
        ttl: Duration,
    ) -> Result<CacheEntry>;

    async fn release(&self, reservation: &Reservation) -> Result<bool>;

    async fn get(&self, key: &CompositeKey) -> Result<Option<CacheEntry>>;

    async fn purge_expired(&self) -> Result<u64>;

    async fn entry_count(&self) -> Result<u64>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}

/// In-process store backed by a sharded concurrent map.
pub struct InMemoryIdempotencyStore {
    entries: DashMap<CompositeKey, CacheEntry>,
    max_entries: Option<usize>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: None,
        }
    }

    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: Some(max_entries),
        }
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.entries.len()) as u64
    }

    // Must run without holding any shard guard: `len` read-locks every shard.
    fn ensure_capacity(&self, key: &CompositeKey, now: DateTime<Utc>) -> Result<()> {
        let Some(max) = self.max_entries else {
            return Ok(());
        };
        if self.entries.len() < max || self.entries.contains_key(key) {
            return Ok(());
        }

        let purged = self.purge_expired_at(now);
        if self.entries.len() >= max {
            tracing::warn!(max_entries = max, purged, "Idempotency store at capacity");
            return Err(AppError::StoreUnavailable(format!(
                "capacity of {} entries reached",
                max
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_reserve(
        &self,
        key: &CompositeKey,
        lease: Duration,
        request_fingerprint: Option<String>,
    ) -> Result<ReserveOutcome> {
        let now = Utc::now();
        self.ensure_capacity(key, now)?;

        let outcome = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired_at(now) {
                    let entry = CacheEntry::reserved(lease, request_fingerprint, now);
                    let reservation_id = entry.reservation_id;
                    occupied.insert(entry);
                    ReserveOutcome::Reserved(Reservation {
                        key: key.clone(),
                        reservation_id,
                    })
                } else {
                    ReserveOutcome::Existing(occupied.get().clone())
                }
            }
            Entry::Vacant(vacant) => {
                let entry = CacheEntry::reserved(lease, request_fingerprint, now);
                let reservation_id = entry.reservation_id;
                vacant.insert(entry);
                ReserveOutcome::Reserved(Reservation {
                    key: key.clone(),
                    reservation_id,
                })
            }
        };

        Ok(outcome)
    }

    async fn complete(
        &self,
        reservation: &Reservation,
        payload: CachedResponse,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let now = Utc::now();
        match self.entries.get_mut(&reservation.key) {
            Some(mut entry) if entry.owned_by(reservation) => {
                let completed = entry.clone().completed(payload, ttl, now);
                *entry = completed.clone();
                Ok(completed)
            }
            _ => Err(AppError::ReservationLost(reservation.key.to_string())),
        }
    }

    async fn release(&self, reservation: &Reservation) -> Result<bool> {
        let removed = self
            .entries
            .remove_if(&reservation.key, |_, entry| entry.owned_by(reservation));
        Ok(removed.is_some())
    }

    async fn get(&self, key: &CompositeKey) -> Result<Option<CacheEntry>> {
        let now = Utc::now();
        {
            match self.entries.get(key) {
                Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired_at(now));
        Ok(None)
    }

    async fn purge_expired(&self) -> Result<u64> {
        Ok(self.purge_expired_at(Utc::now()))
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

const RESERVE_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
    return existing
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
return false
"#;

const COMPLETE_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if not existing then
    return 0
end
local entry = cjson.decode(existing)
if entry['reservation_id'] ~= ARGV[1] or entry['state'] ~= 'reserved' then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if not existing then
    return 0
end
local entry = cjson.decode(existing)
if entry['reservation_id'] ~= ARGV[1] or entry['state'] ~= 'reserved' then
    return 0
end
return redis.call('DEL', KEYS[1])
"#;

/// Redis-backed store; every check-then-act runs as a single Lua script.
pub struct RedisIdempotencyStore {
    client: redis::Client,
    key_generator: IdempotencyKeyGenerator,
    reserve_script: redis::Script,
    complete_script: redis::Script,
    release_script: redis::Script,
}

impl RedisIdempotencyStore {
    pub fn new(client: redis::Client, key_generator: IdempotencyKeyGenerator) -> Self {
        Self {
            client,
            key_generator,
            reserve_script: redis::Script::new(RESERVE_SCRIPT),
            complete_script: redis::Script::new(COMPLETE_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    fn make_key(&self, key: &CompositeKey) -> String {
        self.key_generator.storage_key(key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("redis connection failed: {}", e)))
    }

    fn record(operation: &str, start: Instant, success: bool) {
        get_metrics().record_store_operation(
            "redis",
            operation,
            start.elapsed().as_secs_f64() * 1000.0,
            success,
        );
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn try_reserve(
        &self,
        key: &CompositeKey,
        lease: Duration,
        request_fingerprint: Option<String>,
    ) -> Result<ReserveOutcome> {
        let start = Instant::now();
        let mut conn = self.connection().await?;

        let entry = CacheEntry::reserved(lease, request_fingerprint, Utc::now());
        let serialized = serde_json::to_string(&entry)?;

        let existing: Option<String> = self
            .reserve_script
            .key(self.make_key(key))
            .arg(serialized)
            .arg(entry.ttl_ms.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                Self::record("try_reserve", start, false);
                AppError::Redis(e)
            })?;
        Self::record("try_reserve", start, true);

        match existing {
            Some(json) => Ok(ReserveOutcome::Existing(serde_json::from_str(&json)?)),
            None => Ok(ReserveOutcome::Reserved(Reservation {
                key: key.clone(),
                reservation_id: entry.reservation_id,
            })),
        }
    }

    async fn complete(
        &self,
        reservation: &Reservation,
        payload: CachedResponse,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let start = Instant::now();
        let mut conn = self.connection().await?;

        let current = self
            .get(&reservation.key)
            .await?
            .filter(|entry| entry.owned_by(reservation))
            .ok_or_else(|| AppError::ReservationLost(reservation.key.to_string()))?;
        let completed = current.completed(payload, ttl, Utc::now());

        let updated: i64 = self
            .complete_script
            .key(self.make_key(&reservation.key))
            .arg(reservation.reservation_id.to_string())
            .arg(serde_json::to_string(&completed)?)
            .arg(completed.ttl_ms.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                Self::record("complete", start, false);
                AppError::Redis(e)
            })?;
        Self::record("complete", start, true);

        if updated == 1 {
            Ok(completed)
        } else {
            Err(AppError::ReservationLost(reservation.key.to_string()))
        }
    }

    async fn release(&self, reservation: &Reservation) -> Result<bool> {
        let start = Instant::now();
        let mut conn = self.connection().await?;

        let deleted: i64 = self
            .release_script
            .key(self.make_key(&reservation.key))
            .arg(reservation.reservation_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                Self::record("release", start, false);
                AppError::Redis(e)
            })?;
        Self::record("release", start, true);

        Ok(deleted > 0)
    }

    async fn get(&self, key: &CompositeKey) -> Result<Option<CacheEntry>> {
        use redis::AsyncCommands;

        let start = Instant::now();
        let mut conn = self.connection().await?;

        let value: Option<String> = conn.get(self.make_key(key)).await.map_err(|e| {
            Self::record("get", start, false);
            AppError::Redis(e)
        })?;
        Self::record("get", start, true);

        match value {
            Some(json) => {
                let entry: CacheEntry = serde_json::from_str(&json)?;
                Ok(Some(entry).filter(|e| !e.is_expired()))
            }
            None => Ok(None),
        }
    }

    async fn purge_expired(&self) -> Result<u64> {
        // Redis evicts on PX expiry.
        Ok(0)
    }

    async fn entry_count(&self) -> Result<u64> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let pattern = format!("{}_*", self.key_generator.key_prefix());
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;

        let mut count = 0u64;
        while iter.next_item().await.is_some() {
            count += 1;
        }
        Ok(count)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
