use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::models::{sample_orders, Order, MAX_STATUS_LENGTH};
use crate::observability::get_metrics;
use crate::services::ProductService;

/// Fields accepted when placing an order.
#[derive(Debug, Clone)]
pub struct PlaceOrderInput {
    pub product_id: i64,
    pub quantity: i32,
    pub status: String,
}

/// In-memory order book. Placing an order draws stock from the catalog.
#[derive(Debug)]
pub struct OrderService {
    orders: RwLock<Vec<Order>>,
    products: Arc<ProductService>,
}

impl OrderService {
    pub fn new(products: Arc<ProductService>) -> Self {
        Self {
            orders: RwLock::new(Vec::new()),
            products,
        }
    }

    /// Order book pre-populated with the sample history.
    pub fn with_sample_data(products: Arc<ProductService>) -> Self {
        Self {
            orders: RwLock::new(sample_orders()),
            products,
        }
    }

    fn validate(input: &PlaceOrderInput) -> Result<()> {
        let status = input.status.trim();
        if input.product_id <= 0 || input.quantity <= 0 || status.is_empty() {
            return Err(AppError::Validation(
                "Invalid order details. Please provide valid ProductId, Quantity, and Status."
                    .to_string(),
            ));
        }
        if status.chars().count() > MAX_STATUS_LENGTH {
            return Err(AppError::Validation(format!(
                "Status must be at most {} characters",
                MAX_STATUS_LENGTH
            )));
        }
        Ok(())
    }

    pub async fn place_order(&self, input: PlaceOrderInput) -> Result<Order> {
        if let Err(e) = Self::validate(&input) {
            get_metrics().record_order_rejected("validation");
            return Err(e);
        }

        // Hold the order book while taking stock so ids stay in placement order.
        let mut orders = self.orders.write().await;
        if let Err(e) = self.products.take_stock(input.product_id, input.quantity).await {
            get_metrics().record_order_rejected(match e {
                AppError::NotFound(_) => "unknown_product",
                _ => "insufficient_stock",
            });
            return Err(e);
        }

        let id = orders.iter().map(|o| o.id).max().map_or(1, |max| max + 1);
        let order = Order::new(id, input.product_id, input.quantity, input.status.trim());
        orders.push(order.clone());

        get_metrics().record_order_created(order.product_id);
        tracing::info!(order_id = order.id, product_id = order.product_id, "Order created");
        Ok(order)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Order> {
        self.orders
            .read()
            .await
            .iter()
            .find(|o| o.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Order with id '{}' not found", id)))
    }

    pub async fn list_orders(&self) -> Vec<Order> {
        self.orders.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> OrderService {
        OrderService::new(Arc::new(ProductService::with_sample_data()))
    }

    fn input(product_id: i64, quantity: i32, status: &str) -> PlaceOrderInput {
        PlaceOrderInput {
            product_id,
            quantity,
            status: status.to_string(),
        }
    }

    #[tokio::test]
    async fn test_place_order_decrements_stock() {
        let products = Arc::new(ProductService::with_sample_data());
        let service = OrderService::new(Arc::clone(&products));

        let order = service.place_order(input(5, 2, "Pending")).await.unwrap();
        assert_eq!(order.id, 1);
        assert_eq!(products.find_by_id(5).await.unwrap().stock_quantity, 18);
    }

    #[tokio::test]
    async fn test_ids_continue_after_sample_history() {
        let service = OrderService::with_sample_data(Arc::new(ProductService::with_sample_data()));
        let order = service.place_order(input(1, 1, "Pending")).await.unwrap();
        assert_eq!(order.id, 11);
    }

    #[tokio::test]
    async fn test_invalid_orders_rejected() {
        let service = service();
        for bad in [
            input(0, 1, "Pending"),
            input(1, 0, "Pending"),
            input(1, 1, ""),
            input(1, 1, "a-status-that-is-far-too-long"),
        ] {
            assert!(matches!(service.place_order(bad).await, Err(AppError::Validation(_))));
        }
        assert_eq!(service.count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_product_and_stock_exhaustion() {
        let service = service();
        assert!(matches!(
            service.place_order(input(99, 1, "Pending")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            service.place_order(input(5, 21, "Pending")).await,
            Err(AppError::Validation(_))
        ));
    }
}
