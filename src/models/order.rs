use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_STATUS_LENGTH: usize = 20;

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub status: String,
    pub order_date: DateTime<Utc>,
}

impl Order {
    pub fn new(id: i64, product_id: i64, quantity: i32, status: impl Into<String>) -> Self {
        Self {
            id,
            product_id,
            quantity,
            status: status.into(),
            order_date: Utc::now(),
        }
    }

    pub fn placed_at(mut self, order_date: DateTime<Utc>) -> Self {
        self.order_date = order_date;
        self
    }
}

/// Order history loaded at startup.
pub fn sample_orders() -> Vec<Order> {
    [
        (1, 1, 1, "Completed", 25),
        (2, 2, 2, "Pending", 26),
        (3, 3, 5, "Shipped", 27),
        (4, 4, 1, "Completed", 28),
        (5, 5, 1, "Pending", 29),
        (6, 6, 3, "Shipped", 30),
        (7, 7, 2, "Completed", 30),
        (8, 8, 1, "Pending", 30),
        (9, 9, 4, "Shipped", 30),
        (10, 10, 2, "Completed", 30),
    ]
    .into_iter()
    .map(|(id, product_id, quantity, status, day)| {
        let order = Order::new(id, product_id, quantity, status);
        match Utc.with_ymd_and_hms(2024, 9, day, 0, 0, 0).single() {
            Some(date) => order.placed_at(date),
            None => order,
        }
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_orders() {
        let orders = sample_orders();
        assert_eq!(orders.len(), 10);
        assert_eq!(orders[2].status, "Shipped");
        assert_eq!(orders[0].order_date.to_rfc3339(), "2024-09-25T00:00:00+00:00");
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(Order::new(7, 1, 2, "Pending")).unwrap();
        assert_eq!(json["productId"], 1);
        assert!(json.get("orderDate").is_some());
    }
}
