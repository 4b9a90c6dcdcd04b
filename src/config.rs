use axum::http::{HeaderName, Method};
use config::{ConfigError, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::idempotency::{
    ExpiryPolicy, IdempotencyPolicy, IdempotencyRegistry, InFlightPolicy, KeyGeneratorConfig,
    StoreFailurePolicy,
};
use crate::observability::{LogConfig, LogFormat};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub idempotency: IdempotencySettings,
    pub store: StoreSettings,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.log_level.clone(), LogFormat::from(self.log_format.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightMode {
    #[default]
    Reject,
    Wait,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InFlightSettings {
    #[serde(default)]
    pub mode: InFlightMode,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_wait_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for InFlightSettings {
    fn default() -> Self {
        Self {
            mode: InFlightMode::Reject,
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl InFlightSettings {
    pub fn policy(&self) -> InFlightPolicy {
        match self.mode {
            InFlightMode::Reject => InFlightPolicy::Reject,
            InFlightMode::Wait => InFlightPolicy::Wait {
                timeout: Duration::from_millis(self.wait_timeout_ms),
                poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            },
        }
    }
}

/// A deduplicated route. Unset fields inherit the section-wide values.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteSettings {
    pub method: String,
    pub path: String,
    pub ttl_hours: Option<u64>,
    pub ttl_days: Option<u64>,
    pub reject_without_key: Option<bool>,
    pub capturable_status_codes: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    pub header_name: String,
    pub ttl_hours: Option<u64>,
    pub ttl_days: Option<u64>,
    pub reservation_ttl_seconds: u64,
    pub capturable_status_codes: Vec<u16>,
    pub methods: Vec<String>,
    #[serde(default)]
    pub in_flight: InFlightSettings,
    #[serde(default)]
    pub store_failure_policy: StoreFailurePolicy,
    #[serde(default)]
    pub handler_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    pub max_key_length: usize,
    pub max_body_bytes: usize,
    #[serde(default = "default_true")]
    pub verify_fingerprint: bool,
    pub sweep_interval_seconds: u64,
    #[serde(default)]
    pub routes: Vec<RouteSettings>,
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl IdempotencySettings {
    pub fn header_name(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.header_name.to_ascii_lowercase().as_bytes()).map_err(|e| {
            ConfigError::Message(format!("invalid idempotency.header_name {:?}: {}", self.header_name, e))
        })
    }

    pub fn expiry(&self) -> ExpiryPolicy {
        let fallback = ExpiryPolicy::new(
            ExpiryPolicy::default().ttl,
            Duration::from_secs(self.reservation_ttl_seconds),
        );
        ExpiryPolicy::resolve(self.ttl_hours, self.ttl_days, fallback)
    }

    /// The section-wide policy every route starts from.
    pub fn base_policy(&self) -> IdempotencyPolicy {
        IdempotencyPolicy {
            methods: self.methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            capturable_status_codes: self.capturable_status_codes.iter().copied().collect(),
            expiry: self.expiry(),
            in_flight: self.in_flight.policy(),
            store_failure: self.store_failure_policy,
            reject_without_key: true,
            verify_fingerprint: self.verify_fingerprint,
            handler_retries: self.handler_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn registry(&self) -> Result<IdempotencyRegistry, ConfigError> {
        let base = self.base_policy();
        base.expiry
            .validate()
            .map_err(|e| ConfigError::Message(format!("idempotency: {}", e)))?;

        self.routes.iter().try_fold(IdempotencyRegistry::new(), |registry, route| {
            let method = Method::from_bytes(route.method.to_ascii_uppercase().as_bytes())
                .map_err(|e| ConfigError::Message(format!("invalid method {:?}: {}", route.method, e)))?;

            let mut policy = base.clone();
            policy.expiry = ExpiryPolicy::resolve(route.ttl_hours, route.ttl_days, base.expiry);
            policy.expiry.validate().map_err(|e| {
                ConfigError::Message(format!("route {} {}: {}", method, route.path, e))
            })?;
            if let Some(reject) = route.reject_without_key {
                policy.reject_without_key = reject;
            }
            if let Some(codes) = &route.capturable_status_codes {
                policy = policy.with_capturable_status_codes(codes.iter().copied());
            }
            if !policy.applies_to(&method) {
                return Err(ConfigError::Message(format!(
                    "route {} {} uses a method outside idempotency.methods",
                    method, route.path
                )));
            }

            Ok(registry.register(method, route.path.clone(), policy))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,
    pub max_entries: Option<usize>,
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    /// Bearer token to client id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Builds settings from a TOML document alone.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn key_generator_config(&self) -> KeyGeneratorConfig {
        KeyGeneratorConfig {
            key_prefix: self.store.key_prefix.clone(),
            max_key_length: self.idempotency.max_key_length,
        }
    }
}
