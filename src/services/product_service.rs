use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::models::{sample_products, Product, MAX_PRODUCT_NAME_LENGTH};
use crate::observability::get_metrics;

/// Fields accepted when creating or replacing a product.
#[derive(Debug, Clone)]
pub struct ProductInput {
    pub product_name: String,
    pub price: Decimal,
    pub stock_quantity: i32,
}

/// In-memory product catalog.
#[derive(Debug, Default)]
pub struct ProductService {
    products: RwLock<BTreeMap<i64, Product>>,
}

impl ProductService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the sample products.
    pub fn with_sample_data() -> Self {
        Self::from_products(sample_products())
    }

    pub fn from_products(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: RwLock::new(products.into_iter().map(|p| (p.product_id, p)).collect()),
        }
    }

    fn validate(input: &ProductInput) -> Result<()> {
        let name = input.product_name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Product name cannot be empty".to_string()));
        }
        if name.chars().count() > MAX_PRODUCT_NAME_LENGTH {
            return Err(AppError::Validation(format!(
                "Product name must be at most {} characters",
                MAX_PRODUCT_NAME_LENGTH
            )));
        }
        if input.price < Decimal::ZERO {
            return Err(AppError::Validation("Price cannot be negative".to_string()));
        }
        if input.stock_quantity < 0 {
            return Err(AppError::Validation("Stock quantity cannot be negative".to_string()));
        }
        Ok(())
    }

    pub async fn create_product(&self, input: ProductInput) -> Result<Product> {
        Self::validate(&input)?;

        let mut products = self.products.write().await;
        let product_id = products.keys().next_back().map_or(1, |id| id + 1);
        let product = Product::new(
            product_id,
            input.product_name.trim(),
            input.price,
            input.stock_quantity,
        );
        products.insert(product_id, product.clone());

        get_metrics().record_product_written("create");
        tracing::info!(product_id, "Product created");
        Ok(product)
    }

    pub async fn update_product(&self, product_id: i64, input: ProductInput) -> Result<Product> {
        Self::validate(&input)?;

        let mut products = self.products.write().await;
        let product = products
            .get_mut(&product_id)
            .ok_or_else(|| AppError::NotFound(format!("Product with id '{}' not found", product_id)))?;
        product.product_name = input.product_name.trim().to_string();
        product.price = input.price;
        product.stock_quantity = input.stock_quantity;

        get_metrics().record_product_written("update");
        tracing::info!(product_id, "Product updated");
        Ok(product.clone())
    }

    pub async fn find_by_id(&self, product_id: i64) -> Result<Product> {
        self.products
            .read()
            .await
            .get(&product_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Product with id '{}' not found", product_id)))
    }

    pub async fn list_products(&self) -> Vec<Product> {
        self.products.read().await.values().cloned().collect()
    }

    /// Takes `quantity` units out of stock, all or nothing.
    pub async fn take_stock(&self, product_id: i64, quantity: i32) -> Result<Product> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(&product_id)
            .ok_or_else(|| AppError::NotFound(format!("Product with id '{}' not found", product_id)))?;

        if !product.has_stock_for(quantity) {
            return Err(AppError::Validation(format!(
                "Insufficient stock for product {}: requested {}, available {}",
                product_id, quantity, product.stock_quantity
            )));
        }
        product.stock_quantity -= quantity;
        Ok(product.clone())
    }
}
