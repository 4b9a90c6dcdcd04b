use axum::{
    body::{Body, Bytes},
    extract::{MatchedPath, Request, State},
    http::{
        header::CONTENT_TYPE, request, response, HeaderMap, HeaderName, HeaderValue, Method,
        StatusCode, Uri, Version,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::auth::ClientIdentity;
use crate::error::{AppError, Result};
use crate::idempotency::handler::{CapturableOutcome, Execution, IdempotencyHandler};
use crate::idempotency::policy::IdempotencyRegistry;
use crate::idempotency::storage::CachedResponse;
use crate::observability::mask_sensitive;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

/// State shared by the idempotency middleware.
#[derive(Clone)]
pub struct IdempotencyLayer {
    pub handler: Arc<IdempotencyHandler>,
    pub registry: Arc<IdempotencyRegistry>,
    pub header_name: HeaderName,
    pub max_body_bytes: usize,
}

impl IdempotencyLayer {
    pub fn new(handler: Arc<IdempotencyHandler>, registry: IdempotencyRegistry) -> Self {
        Self {
            handler,
            registry: Arc::new(registry),
            header_name: HeaderName::from_static(IDEMPOTENCY_KEY_HEADER),
            max_body_bytes: 1024 * 1024,
        }
    }

    pub fn with_header_name(mut self, header_name: HeaderName) -> Self {
        self.header_name = header_name;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// A request whose body has been read, so it can be handed to the handler more than once.
struct RequestTemplate {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: axum::http::Extensions,
    body: Bytes,
}

impl RequestTemplate {
    fn new(parts: request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            extensions: parts.extensions,
            body,
        }
    }

    fn build(&self) -> Request {
        let mut request = Request::new(Body::from(self.body.clone()));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        *request.extensions_mut() = self.extensions.clone();
        request
    }
}

/// A handler response with its body read into memory.
struct BufferedResponse {
    parts: response::Parts,
    body: Bytes,
}

impl BufferedResponse {
    async fn capture(response: Response) -> Result<Self> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to read handler response: {}", e)))?;
        Ok(Self { parts, body })
    }
}

impl CapturableOutcome for BufferedResponse {
    fn status_code(&self) -> u16 {
        self.parts.status.as_u16()
    }

    fn to_cached_response(&self) -> CachedResponse {
        let content_type = self
            .parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        CachedResponse::new(self.status_code(), content_type, self.body.to_vec())
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        Response::from_parts(self.parts, Body::from(self.body))
    }
}

/// Rebuilds the original response from a captured payload.
pub fn replay_response(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Some(content_type) = cached
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
    {
        headers.insert(CONTENT_TYPE, content_type);
    }
    headers.insert(
        HeaderName::from_static(REPLAYED_HEADER),
        HeaderValue::from_static("true"),
    );
    response
}

/// Axum middleware that deduplicates registered routes.
///
/// Must be installed with `route_layer` inside the authentication layer so that both
/// `MatchedPath` and `ClientIdentity` are present.
pub async fn idempotency_middleware(
    State(layer): State<IdempotencyLayer>,
    request: Request,
    next: Next,
) -> Response {
    let route = match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => return next.run(request).await,
    };
    let Some(policy) = layer.registry.lookup(request.method(), &route).cloned() else {
        return next.run(request).await;
    };

    let header_value = match request.headers().get(&layer.header_name) {
        Some(value) => match value.to_str() {
            Ok(value) if !value.trim().is_empty() => Some(value.to_string()),
            Ok(_) => None,
            Err(_) => {
                return AppError::Validation("Idempotency-Key must be visible ASCII".to_string())
                    .into_response()
            }
        },
        None => None,
    };
    let Some(header_value) = header_value else {
        if policy.reject_without_key {
            tracing::debug!(route = %route, "Rejecting request without idempotency key");
            return AppError::MissingIdempotencyKey.into_response();
        }
        return next.run(request).await;
    };

    let Some(identity) = request.extensions().get::<ClientIdentity>().cloned() else {
        return AppError::Unauthorized("client identity required".to_string()).into_response();
    };

    let key = match layer.handler.composite_key(identity.client_id(), &header_value) {
        Ok(key) => key,
        Err(e) => return e.into_response(),
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, layer.max_body_bytes).await {
        Ok(body) => body,
        Err(_) => {
            return AppError::Validation(format!(
                "Request body exceeds {} bytes",
                layer.max_body_bytes
            ))
            .into_response()
        }
    };

    let fingerprint = policy.verify_fingerprint.then(|| {
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path());
        layer
            .handler
            .key_generator()
            .request_fingerprint(parts.method.as_str(), target, &body)
    });
    let template = RequestTemplate::new(parts, body);

    tracing::debug!(
        route = %route,
        client_id = %identity.client_id(),
        key = %mask_sensitive(key.idempotency_key(), 2),
        "Idempotent request received"
    );

    let operation = move || {
        let next = next.clone();
        let request = template.build();
        async move { BufferedResponse::capture(next.run(request).await).await }
    };

    match layer.handler.execute(&key, &policy, fingerprint, operation).await {
        Ok(Execution::Executed(response)) => response.into_response(),
        Ok(Execution::Replayed(cached)) => replay_response(cached),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_response_reproduces_payload() {
        let cached = CachedResponse::new(
            201,
            Some("application/json".to_string()),
            b"{\"orderId\":7}".to_vec(),
        );
        let response = replay_response(cached);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(response.headers().get(REPLAYED_HEADER).unwrap(), "true");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"orderId\":7}");
    }

    #[tokio::test]
    async fn test_buffered_response_capture() {
        let response = (StatusCode::OK, [(CONTENT_TYPE, "text/plain")], "hello").into_response();
        let buffered = BufferedResponse::capture(response).await.unwrap();

        assert_eq!(buffered.status_code(), 200);
        let cached = buffered.to_cached_response();
        assert_eq!(cached.content_type.as_deref(), Some("text/plain"));
        assert_eq!(cached.body, b"hello".to_vec());
    }

    #[test]
    fn test_request_template_rebuilds() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/orders")
            .header(IDEMPOTENCY_KEY_HEADER, "k1")
            .body(Body::empty())
            .unwrap();
        let (parts, _) = request.into_parts();
        let template = RequestTemplate::new(parts, Bytes::from_static(b"{}"));

        let first = template.build();
        let second = template.build();
        assert_eq!(first.method(), Method::POST);
        assert_eq!(second.uri(), "/api/orders");
        assert_eq!(second.headers().get(IDEMPOTENCY_KEY_HEADER).unwrap(), "k1");
    }
}
