use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::auth::{auth_middleware, TokenAuthenticator};
use crate::idempotency::{idempotency_middleware, IdempotencyLayer};
use crate::observability::{get_metrics, HealthChecker, LatencyTimer};
use crate::services::{OrderService, ProductService};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub products: Arc<ProductService>,
    pub idempotency: IdempotencyLayer,
    pub authenticator: TokenAuthenticator,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        orders: Arc<OrderService>,
        products: Arc<ProductService>,
        idempotency: IdempotencyLayer,
        authenticator: TokenAuthenticator,
    ) -> Self {
        let health_checker = Arc::new(HealthChecker::new(idempotency.handler.store()));
        Self {
            orders,
            products,
            idempotency,
            authenticator,
            health_checker,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

async fn track_http_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}

/// Creates the main API router with all routes.
///
/// Authentication runs before idempotency on `/api` routes; health and metrics
/// endpoints are public.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Order endpoints
        .route("/api/orders", post(handlers::create_order).get(handlers::list_orders))
        .route("/api/orders/:id", get(handlers::get_order))
        // Product endpoints
        .route("/api/products", post(handlers::create_product).get(handlers::list_products))
        .route(
            "/api/products/:id",
            get(handlers::get_product).put(handlers::update_product),
        )
        .route_layer(middleware::from_fn_with_state(
            state.idempotency.clone(),
            idempotency_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.authenticator.clone(),
            auth_middleware,
        ));

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(api)
        .layer(middleware::from_fn(track_http_metrics))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
