//! Assembles the service from settings.

use std::sync::Arc;

use crate::api::AppState;
use crate::auth::TokenAuthenticator;
use crate::config::{Settings, StoreBackend};
use crate::error::{AppError, Result};
use crate::idempotency::{
    IdempotencyHandler, IdempotencyKeyGenerator, IdempotencyLayer, IdempotencyStore,
    InMemoryIdempotencyStore, RedisIdempotencyStore,
};
use crate::services::{OrderService, ProductService};

/// Builds the idempotency store named by `store.backend`.
pub fn build_store(settings: &Settings) -> Result<Arc<dyn IdempotencyStore>> {
    match settings.store.backend {
        StoreBackend::Memory => {
            let store = match settings.store.max_entries {
                Some(limit) => InMemoryIdempotencyStore::with_capacity_limit(limit),
                None => InMemoryIdempotencyStore::new(),
            };
            Ok(Arc::new(store))
        }
        StoreBackend::Redis => {
            let url = settings.store.redis_url.as_deref().ok_or_else(|| {
                AppError::Validation("store.redis_url is required for the redis backend".to_string())
            })?;
            let client = redis::Client::open(url)?;
            let key_generator = IdempotencyKeyGenerator::new(settings.key_generator_config());
            Ok(Arc::new(RedisIdempotencyStore::new(client, key_generator)))
        }
    }
}

/// Wires services, the idempotency layer and authentication around `store`.
pub fn build_state(settings: &Settings, store: Arc<dyn IdempotencyStore>, seed: bool) -> Result<AppState> {
    let key_generator = IdempotencyKeyGenerator::new(settings.key_generator_config());
    let handler = Arc::new(IdempotencyHandler::new(store, key_generator));
    let idempotency = IdempotencyLayer::new(handler, settings.idempotency.registry()?)
        .with_header_name(settings.idempotency.header_name()?)
        .with_max_body_bytes(settings.idempotency.max_body_bytes);

    let products = Arc::new(if seed {
        ProductService::with_sample_data()
    } else {
        ProductService::new()
    });
    let orders = Arc::new(if seed {
        OrderService::with_sample_data(Arc::clone(&products))
    } else {
        OrderService::new(Arc::clone(&products))
    });

    let authenticator = TokenAuthenticator::new(settings.auth.tokens.clone());

    Ok(AppState::new(orders, products, idempotency, authenticator))
}
