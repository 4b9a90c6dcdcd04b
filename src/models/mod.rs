pub mod order;
pub mod product;

pub use order::{sample_orders, Order, MAX_STATUS_LENGTH};
pub use product::{sample_products, Product, MAX_PRODUCT_NAME_LENGTH};
