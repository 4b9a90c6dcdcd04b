pub mod order_service;
pub mod product_service;

pub use order_service::{OrderService, PlaceOrderInput};
pub use product_service::{ProductInput, ProductService};
