use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Longest TTL or lease a route may configure.
pub const MAX_TTL: Duration = Duration::from_secs(3650 * DAY);

/// How long captured results and in-flight reservations stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub ttl: Duration,
    pub reservation_ttl: Duration,
}

impl ExpiryPolicy {
    pub fn new(ttl: Duration, reservation_ttl: Duration) -> Self {
        Self { ttl, reservation_ttl }
    }

    pub fn from_hours(hours: u64) -> Self {
        Self {
            ttl: Duration::from_secs(hours.saturating_mul(HOUR)),
            ..Self::default()
        }
    }

    pub fn from_days(days: u64) -> Self {
        Self {
            ttl: Duration::from_secs(days.saturating_mul(DAY)),
            ..Self::default()
        }
    }

    /// Days take precedence over hours when both are configured.
    pub fn resolve(hours: Option<u64>, days: Option<u64>, fallback: Self) -> Self {
        match (days, hours) {
            (Some(days), _) => Self { ttl: Duration::from_secs(days.saturating_mul(DAY)), ..fallback },
            (None, Some(hours)) => Self { ttl: Duration::from_secs(hours.saturating_mul(HOUR)), ..fallback },
            (None, None) => fallback,
        }
    }

    /// Both durations must be non-zero and at most [`MAX_TTL`].
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [("ttl", self.ttl), ("reservation ttl", self.reservation_ttl)] {
            if value.is_zero() {
                return Err(format!("{} must be greater than zero", name));
            }
            if value > MAX_TTL {
                return Err(format!(
                    "{} of {}s exceeds the maximum of {}s",
                    name,
                    value.as_secs(),
                    MAX_TTL.as_secs()
                ));
            }
        }
        Ok(())
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * HOUR),
            reservation_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// What to do when an identical request is still being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InFlightPolicy {
    /// Answer immediately with a conflict.
    #[default]
    Reject,
    /// Poll until the in-flight request resolves or the timeout elapses.
    Wait {
        timeout: Duration,
        poll_interval: Duration,
    },
}

/// What to do when the store cannot answer `try_reserve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Reject the request; deduplication is never silently skipped.
    #[default]
    FailClosed,
    /// Execute without deduplication.
    FailOpen,
}

/// Per-operation idempotency behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyPolicy {
    pub methods: BTreeSet<String>,
    pub capturable_status_codes: BTreeSet<u16>,
    pub expiry: ExpiryPolicy,
    pub in_flight: InFlightPolicy,
    pub store_failure: StoreFailurePolicy,
    pub reject_without_key: bool,
    pub verify_fingerprint: bool,
    pub handler_retries: u32,
    pub retry_delay: Duration,
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self {
            methods: ["POST", "PUT"].into_iter().map(String::from).collect(),
            capturable_status_codes: [200, 201].into_iter().collect(),
            expiry: ExpiryPolicy::default(),
            in_flight: InFlightPolicy::default(),
            store_failure: StoreFailurePolicy::default(),
            reject_without_key: true,
            verify_fingerprint: true,
            handler_retries: 0,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl IdempotencyPolicy {
    pub fn applies_to(&self, method: &Method) -> bool {
        self.methods.contains(method.as_str())
    }

    pub fn should_capture(&self, status_code: u16) -> bool {
        self.capturable_status_codes.contains(&status_code)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expiry.ttl = ttl;
        self
    }

    pub fn with_in_flight(mut self, in_flight: InFlightPolicy) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn with_store_failure(mut self, store_failure: StoreFailurePolicy) -> Self {
        self.store_failure = store_failure;
        self
    }

    pub fn with_handler_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.handler_retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_capturable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.capturable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn without_key_requirement(mut self) -> Self {
        self.reject_without_key = false;
        self
    }
}

/// Routes that take part in deduplication, registered explicitly at startup.
///
/// Keyed by method and the router's path pattern (e.g. `/api/products/:id`).
#[derive(Debug, Clone, Default)]
pub struct IdempotencyRegistry {
    routes: HashMap<(Method, String), IdempotencyPolicy>,
}

impl IdempotencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route; the policy's method filter is still evaluated at request time.
    pub fn register(mut self, method: Method, route: impl Into<String>, policy: IdempotencyPolicy) -> Self {
        self.routes.insert((method, route.into()), policy);
        self
    }

    pub fn lookup(&self, method: &Method, route: &str) -> Option<&IdempotencyPolicy> {
        self.routes
            .get(&(method.clone(), route.to_string()))
            .filter(|policy| policy.applies_to(method))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = IdempotencyPolicy::default();
        assert!(policy.should_capture(200));
        assert!(policy.should_capture(201));
        assert!(!policy.should_capture(400));
        assert!(!policy.should_capture(500));
        assert_eq!(policy.expiry.ttl, Duration::from_secs(86_400));
        assert_eq!(policy.in_flight, InFlightPolicy::Reject);
        assert_eq!(policy.store_failure, StoreFailurePolicy::FailClosed);
        assert!(policy.reject_without_key);
    }

    #[test]
    fn test_method_predicate() {
        let policy = IdempotencyPolicy::default();
        assert!(policy.applies_to(&Method::POST));
        assert!(policy.applies_to(&Method::PUT));
        assert!(!policy.applies_to(&Method::GET));
        assert!(!policy.applies_to(&Method::DELETE));
    }

    #[test]
    fn test_expiry_resolution() {
        let fallback = ExpiryPolicy::default();
        assert_eq!(ExpiryPolicy::resolve(None, None, fallback), fallback);
        assert_eq!(
            ExpiryPolicy::resolve(Some(2), None, fallback).ttl,
            Duration::from_secs(7200)
        );
        assert_eq!(
            ExpiryPolicy::resolve(Some(2), Some(3), fallback).ttl,
            Duration::from_secs(3 * 86_400)
        );
        assert_eq!(ExpiryPolicy::from_days(1).ttl, ExpiryPolicy::from_hours(24).ttl);
    }

    #[test]
    fn test_expiry_validation() {
        assert!(ExpiryPolicy::default().validate().is_ok());
        assert!(ExpiryPolicy::from_days(3650).validate().is_ok());
        assert!(ExpiryPolicy::from_days(3651).validate().is_err());
        assert!(ExpiryPolicy::from_hours(0).validate().is_err());
        assert!(ExpiryPolicy::new(Duration::from_secs(60), Duration::ZERO)
            .validate()
            .is_err());

        let huge = ExpiryPolicy::resolve(None, Some(u64::MAX), ExpiryPolicy::default());
        assert_eq!(huge.ttl, Duration::from_secs(u64::MAX));
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = IdempotencyRegistry::new()
            .register(Method::POST, "/api/orders", IdempotencyPolicy::default())
            .register(
                Method::PUT,
                "/api/products/:id",
                IdempotencyPolicy::default().with_ttl(Duration::from_secs(60)),
            );

        assert_eq!(registry.len(), 2);
        assert!(registry.lookup(&Method::POST, "/api/orders").is_some());
        assert!(registry.lookup(&Method::GET, "/api/orders").is_none());
        assert_eq!(
            registry
                .lookup(&Method::PUT, "/api/products/:id")
                .unwrap()
                .expiry
                .ttl,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_registry_respects_method_filter() {
        let mut policy = IdempotencyPolicy::default();
        policy.methods = ["PUT".to_string()].into_iter().collect();
        let registry = IdempotencyRegistry::new().register(Method::POST, "/api/orders", policy);

        assert!(registry.lookup(&Method::POST, "/api/orders").is_none());
    }
}
