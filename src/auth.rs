//! Bearer-token authentication that establishes the caller's client identity.
//!
//! The identity is inserted into request extensions, where the idempotency
//! middleware reads it to build composite keys.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::observability::mask_sensitive;

const BEARER_PREFIX: &str = "Bearer ";

/// The verified identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    client_id: String,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Resolves bearer tokens against a static token table.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: Arc<HashMap<String, String>>,
}

impl TokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens: Arc::new(tokens),
        }
    }

    fn extract_token(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<ClientIdentity> {
        let token = Self::extract_token(headers)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        match self.tokens.get(token) {
            Some(client_id) => Ok(ClientIdentity::new(client_id.clone())),
            None => {
                tracing::debug!(token = %mask_sensitive(token, 2), "Unknown bearer token");
                Err(AppError::Unauthorized("invalid bearer token".to_string()))
            }
        }
    }
}

/// Axum middleware that rejects unauthenticated requests with 401.
pub async fn auth_middleware(
    State(authenticator): State<TokenAuthenticator>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticator.authenticate(request.headers()) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
