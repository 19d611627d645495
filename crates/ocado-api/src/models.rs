//! Domain models parsed from Ocado API responses.
//!
//! The API's JSON shapes drift between app releases (fields renamed, totals
//! switching between object and scalar form), so parsing is deliberately
//! lenient: missing fields default instead of failing the whole resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn str_at(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Account profile, from `GET /v1/user/current`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub first_name: String,
    pub full_name: String,
    pub username: String,
    pub customer_id: String,
}

impl UserProfile {
    pub fn from_value(data: &Value) -> Self {
        Self {
            first_name: str_at(data, "firstName"),
            full_name: str_at(data, "fullName"),
            username: str_at(data, "username"),
            customer_id: str_at(data, "retailerCustomerId"),
        }
    }
}

/// A single order, from `GET /v2/orders/recent`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: String,
    pub status_message: String,
    pub items_count: u64,
    pub total_price: String,
    pub currency: String,
    pub delivery_address: String,
    pub delivery_slot_start: String,
    pub delivery_slot_end: String,
    pub delivery_method: String,
    pub slot_cost: String,
    pub is_editable: bool,
}

impl Order {
    pub fn from_value(o: &Value) -> Self {
        let delivery = o.get("delivery").cloned().unwrap_or_default();
        let slot = delivery.get("slot").cloned().unwrap_or_default();
        let addr = delivery.get("address").cloned().unwrap_or_default();
        let price = o.get("totalPrice").cloned().unwrap_or_default();
        let slot_cost = slot.get("cost").cloned().unwrap_or_default();

        // Slot windows appeared as start/end in older payloads and
        // startDate/endDate in current ones.
        let slot_start = slot
            .get("startDate")
            .or_else(|| slot.get("start"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let slot_end = slot
            .get("endDate")
            .or_else(|| slot.get("end"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Self {
            id: str_at(o, "id"),
            status: str_at(o, "status"),
            status_message: str_at(o, "statusMessage"),
            items_count: o.get("items").and_then(|v| v.as_u64()).unwrap_or(0),
            total_price: price
                .get("amount")
                .and_then(|v| v.as_str())
                .unwrap_or("0")
                .to_string(),
            currency: price
                .get("currency")
                .and_then(|v| v.as_str())
                .unwrap_or("GBP")
                .to_string(),
            delivery_address: str_at(&addr, "address"),
            delivery_slot_start: slot_start,
            delivery_slot_end: slot_end,
            delivery_method: str_at(&delivery, "deliveryMethod"),
            slot_cost: str_at(&slot_cost, "amount"),
            is_editable: o.get("isEditable").and_then(|v| v.as_bool()).unwrap_or(false),
        }
    }
}

/// Upcoming and delivered orders, from `GET /v2/orders/recent`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentOrders {
    pub upcoming: Vec<Order>,
    pub delivered: Vec<Order>,
}

impl RecentOrders {
    pub fn from_value(data: &Value) -> Self {
        let parse_list = |key: &str| -> Vec<Order> {
            data.get(key)
                .and_then(|v| v.as_array())
                .map(|orders| orders.iter().map(Order::from_value).collect())
                .unwrap_or_default()
        };

        Self {
            upcoming: parse_list("upcoming"),
            delivered: parse_list("delivered"),
        }
    }
}

/// Simplified cart, from `GET /v1/carts/active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub item_count: u64,
    pub total_price: String,
    pub currency: String,
}

impl Default for Cart {
    fn default() -> Self {
        Self {
            item_count: 0,
            total_price: "0.00".to_string(),
            currency: "GBP".to_string(),
        }
    }
}

impl Cart {
    /// Parse a cart payload. The cart structure varies: line items under
    /// `products` or `items`, and the total as either a price object or a
    /// bare scalar.
    pub fn from_value(data: &Value) -> Self {
        let Some(obj) = data.as_object() else {
            return Self::default();
        };

        let items = obj.get("products").or_else(|| obj.get("items"));
        let item_count = items
            .and_then(|v| v.as_array())
            .map(|list| list.len() as u64)
            .unwrap_or(0);

        let total = obj.get("totalPrice").or_else(|| obj.get("total"));
        let (total_price, currency) = match total {
            Some(Value::Object(price)) => (
                price
                    .get("amount")
                    .and_then(|v| v.as_str())
                    .unwrap_or("0.00")
                    .to_string(),
                price
                    .get("currency")
                    .and_then(|v| v.as_str())
                    .unwrap_or("GBP")
                    .to_string(),
            ),
            Some(Value::Null) | None => ("0.00".to_string(), "GBP".to_string()),
            Some(other) => {
                let amount = other
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string());
                (amount, "GBP".to_string())
            }
        };

        Self {
            item_count,
            total_price,
            currency,
        }
    }
}

/// Next available delivery slot, from `GET /v4/slot/next-available`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliverySlot {
    pub slot_id: String,
    pub slot_type: String,
    pub start_time: String,
    pub end_time: String,
    pub address: String,
    pub delivery_method: String,
}

impl DeliverySlot {
    pub fn from_value(data: &Value) -> Self {
        let slot = data.get("slot").cloned().unwrap_or_default();
        let delivery = data.get("delivery").cloned().unwrap_or_default();
        let window = slot.get("slotWindow").cloned().unwrap_or_default();
        let addr = delivery.get("address").cloned().unwrap_or_default();

        Self {
            slot_id: str_at(&slot, "slotId"),
            slot_type: str_at(&slot, "type"),
            start_time: str_at(&window, "startTime"),
            end_time: str_at(&window, "endTime"),
            address: str_at(&addr, "address"),
            delivery_method: str_at(&delivery, "deliveryMethod"),
        }
    }
}

/// Active delivery subscription (smart pass), from
/// `GET /v1/user/subscriptions/delivery/active`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliverySubscription {
    pub kind: String,
}

impl DeliverySubscription {
    /// Returns `None` when the payload carries no subscription.
    pub fn from_value(data: &Value) -> Option<Self> {
        let obj = data.as_object().filter(|o| !o.is_empty())?;
        let kind = obj
            .get("type")
            .or_else(|| obj.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("Active")
            .to_string();
        Some(Self { kind })
    }
}

/// Parse the not-cancelled order count, which the API returns as either
/// `{"count": N}`, `{"orderCount": N}`, or a bare integer.
pub fn parse_order_count(data: &Value) -> u64 {
    match data {
        Value::Object(obj) => obj
            .get("count")
            .or_else(|| obj.get("orderCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        other => other.as_u64().unwrap_or(0),
    }
}
