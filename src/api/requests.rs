use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{MAX_PRODUCT_NAME_LENGTH, MAX_STATUS_LENGTH};
use crate::services::{PlaceOrderInput, ProductInput};

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Request to place an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub product_id: i64,
    pub quantity: i32,
    #[serde(default)]
    pub status: String,
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.product_id <= 0 {
            errors.push(ValidationError::new("productId", "productId must be positive"));
        }
        if self.quantity <= 0 {
            errors.push(ValidationError::new("quantity", "quantity must be positive"));
        }
        if self.status.trim().is_empty() {
            errors.push(ValidationError::new("status", "status cannot be empty"));
        } else if self.status.trim().chars().count() > MAX_STATUS_LENGTH {
            errors.push(ValidationError::new(
                "status",
                format!("status must be at most {} characters", MAX_STATUS_LENGTH),
            ));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl From<CreateOrderRequest> for PlaceOrderInput {
    fn from(request: CreateOrderRequest) -> Self {
        Self {
            product_id: request.product_id,
            quantity: request.quantity,
            status: request.status,
        }
    }
}

/// Request to create or replace a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    pub product_name: String,
    pub price: Decimal,
    pub stock_quantity: i32,
}

impl ProductRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.product_name.trim().is_empty() {
            errors.push(ValidationError::new("productName", "productName cannot be empty"));
        } else if self.product_name.trim().chars().count() > MAX_PRODUCT_NAME_LENGTH {
            errors.push(ValidationError::new(
                "productName",
                format!("productName must be at most {} characters", MAX_PRODUCT_NAME_LENGTH),
            ));
        }
        if self.price < Decimal::ZERO {
            errors.push(ValidationError::new("price", "price cannot be negative"));
        }
        if self.stock_quantity < 0 {
            errors.push(ValidationError::new("stockQuantity", "stockQuantity cannot be negative"));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl From<ProductRequest> for ProductInput {
    fn from(request: ProductRequest) -> Self {
        Self {
            product_name: request.product_name,
            price: request.price,
            stock_quantity: request.stock_quantity,
        }
    }
}
