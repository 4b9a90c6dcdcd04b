use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::requests::{CreateOrderRequest, ProductRequest, ValidationError};
use crate::api::responses::{
    ApiResponse, DetailedHealthResponse, ErrorResponse, HealthResponse, OrderCreatedResponse,
    ServiceHealth, ValidationErrorDetail,
};
use crate::error::{ApiError, AppError};
use crate::idempotency::IdempotencyStore;
use crate::models::{Order, Product};

use super::routes::AppState;

fn validation_failed(errors: Vec<ValidationError>) -> ApiError {
    let details: Vec<ValidationErrorDetail> = errors
        .into_iter()
        .map(|e| ValidationErrorDetail {
            field: e.field,
            message: e.message,
        })
        .collect();

    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(
            ErrorResponse::new("VALIDATION_ERROR", "Request validation failed").with_details(details),
        )),
    )
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let store = state.health_checker.check_idempotency_store().await;

    let response = HealthResponse {
        status: if store.status.is_healthy() { "healthy".to_string() } else { "degraded".to_string() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        services: ServiceHealth {
            idempotency_store: !store.status.is_unhealthy(),
        },
    };

    Json(ApiResponse::success(response))
}

/// Dependency health plus idempotency counters.
pub async fn detailed_health_check(
    State(state): State<AppState>,
) -> Json<ApiResponse<DetailedHealthResponse>> {
    let handler = &state.idempotency.handler;
    let health = state.health_checker.check_all().await;
    let store_entries = handler.store().entry_count().await.ok();

    Json(ApiResponse::success(DetailedHealthResponse {
        health,
        idempotency: handler.metrics().snapshot(),
        store_entries,
    }))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

// ============================================================================
// Order Handlers
// ============================================================================

/// Place an order. Deduplicated by the idempotency middleware.
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    request.validate().map_err(validation_failed)?;

    let order = state
        .orders
        .place_order(request.into())
        .await
        .map_err(AppError::into_api_error)?;

    Ok((StatusCode::CREATED, Json(OrderCreatedResponse::new(order.id))))
}

pub async fn list_orders(State(state): State<AppState>) -> Json<ApiResponse<Vec<Order>>> {
    Json(ApiResponse::success(state.orders.list_orders().await))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ApiError> {
    let order = state.orders.find_by_id(id).await.map_err(AppError::into_api_error)?;
    Ok(Json(ApiResponse::success(order)))
}

// ============================================================================
// Product Handlers
// ============================================================================

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<ProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Product>>), ApiError> {
    request.validate().map_err(validation_failed)?;

    let product = state
        .products
        .create_product(request.into())
        .await
        .map_err(AppError::into_api_error)?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(product))))
}

/// Replace a product's fields.
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ProductRequest>,
) -> Result<Json<ApiResponse<Product>>, ApiError> {
    request.validate().map_err(validation_failed)?;

    let product = state
        .products
        .update_product(id, request.into())
        .await
        .map_err(AppError::into_api_error)?;

    Ok(Json(ApiResponse::success(product)))
}

pub async fn list_products(State(state): State<AppState>) -> Json<ApiResponse<Vec<Product>>> {
    Json(ApiResponse::success(state.products.list_products().await))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Product>>, ApiError> {
    let product = state.products.find_by_id(id).await.map_err(AppError::into_api_error)?;
    Ok(Json(ApiResponse::success(product)))
}
