use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{AppError, Result};

/// Configuration for composite key construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyGeneratorConfig {
    /// Prefix for storage keys handed to out-of-process stores
    pub key_prefix: String,
    /// Longest accepted `Idempotency-Key` header value
    pub max_key_length: usize,
}

impl Default for KeyGeneratorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "idem".to_string(),
            max_key_length: 255,
        }
    }
}

/// The deduplication unit: a caller's verified identity paired with the key it supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    client_id: String,
    idempotency_key: String,
}

impl CompositeKey {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// Hex SHA-256 over the length-prefixed pair.
    ///
    /// Length prefixes keep `("a-b", "c")` and `("a", "b-c")` apart.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.client_id.len() as u64).to_be_bytes());
        hasher.update(self.client_id.as_bytes());
        hasher.update((self.idempotency_key.len() as u64).to_be_bytes());
        hasher.update(self.idempotency_key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_id, self.idempotency_key)
    }
}

/// Builds composite keys and request fingerprints. Pure; performs no I/O.
#[derive(Debug, Clone)]
pub struct IdempotencyKeyGenerator {
    config: KeyGeneratorConfig,
}

impl IdempotencyKeyGenerator {
    pub fn new(config: KeyGeneratorConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(KeyGeneratorConfig::default())
    }

    /// Combines the verified client identifier with the raw header value.
    pub fn composite(&self, client_id: &str, header_value: &str) -> Result<CompositeKey> {
        let idempotency_key = header_value.trim();
        if idempotency_key.is_empty() {
            return Err(AppError::MissingIdempotencyKey);
        }
        if idempotency_key.len() > self.config.max_key_length {
            return Err(AppError::Validation(format!(
                "Idempotency-Key must be at most {} characters",
                self.config.max_key_length
            )));
        }
        if client_id.is_empty() {
            return Err(AppError::Unauthorized("client identity is empty".to_string()));
        }

        Ok(CompositeKey {
            client_id: client_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
        })
    }

    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    /// Key under which an out-of-process store keeps the entry.
    pub fn storage_key(&self, key: &CompositeKey) -> String {
        format!("{}_{}", self.config.key_prefix, key.fingerprint())
    }

    /// Hash of what the request asked for, used to detect key reuse with a different payload.
    ///
    /// `target` is the path including its query string.
    pub fn request_fingerprint(&self, method: &str, target: &str, body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.to_uppercase().as_bytes());
        hasher.update(b"|");
        hasher.update(target.as_bytes());
        hasher.update(b"|");
        hasher.update(body);
        hex::encode(hasher.finalize())
    }
}
