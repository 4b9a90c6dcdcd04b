use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const MAX_PRODUCT_NAME_LENGTH: usize = 100;

/// A catalog item that orders draw stock from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: i64,
    pub product_name: String,
    pub price: Decimal,
    pub stock_quantity: i32,
}

impl Product {
    pub fn new(product_id: i64, product_name: impl Into<String>, price: Decimal, stock_quantity: i32) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            price,
            stock_quantity,
        }
    }

    pub fn has_stock_for(&self, quantity: i32) -> bool {
        quantity > 0 && self.stock_quantity >= quantity
    }
}

/// The catalog loaded at startup.
pub fn sample_products() -> Vec<Product> {
    [
        (1, "Laptop", 99999, 50),
        (2, "Smartphone", 49999, 100),
        (3, "Headphones", 19999, 75),
        (4, "Smartwatch", 24999, 30),
        (5, "Gaming Console", 39999, 20),
        (6, "Wireless Mouse", 4999, 150),
        (7, "Bluetooth Speaker", 9999, 80),
        (8, "External Hard Drive", 7999, 60),
        (9, "USB-C Hub", 2999, 200),
        (10, "Monitor", 29999, 40),
    ]
    .into_iter()
    .map(|(id, name, cents, stock)| Product::new(id, name, Decimal::new(cents, 2), stock))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sample_catalog() {
        let products = sample_products();
        assert_eq!(products.len(), 10);
        assert_eq!(products[0].price, dec!(999.99));
        assert_eq!(products[9].product_name, "Monitor");
    }

    #[test]
    fn test_stock_check() {
        let product = Product::new(1, "Laptop", dec!(999.99), 2);
        assert!(product.has_stock_for(2));
        assert!(!product.has_stock_for(3));
        assert!(!product.has_stock_for(0));
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(Product::new(3, "Headphones", dec!(199.99), 75)).unwrap();
        assert_eq!(json["productId"], 3);
        assert_eq!(json["stockQuantity"], 75);
        assert_eq!(json["price"], "199.99");
    }
}
