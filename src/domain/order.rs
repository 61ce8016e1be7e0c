use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shown in place of the pharmacy name when an order does not carry one.
pub const PHARMACY_NAME_PLACEHOLDER: &str = "Farmacia";

/// Lifecycle status of an order, as written by the backend.
///
/// Unknown values are kept verbatim in `Other` so a newer backend never
/// breaks an older client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    /// Created from an accepted quote, awaiting payment.
    Pending,
    Paid,
    Preparing,
    InTransit,
    Delivered,
    Cancelled,
    Rejected,
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Pending => "pendiente",
            OrderStatus::Paid => "pagado",
            OrderStatus::Preparing => "en_preparacion",
            OrderStatus::InTransit => "en_camino",
            OrderStatus::Delivered => "entregado",
            OrderStatus::Cancelled => "cancelado",
            OrderStatus::Rejected => "rechazado",
            OrderStatus::Other(raw) => raw,
        }
    }
}

impl From<&str> for OrderStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "pendiente" => OrderStatus::Pending,
            "pagado" => OrderStatus::Paid,
            "en_preparacion" => OrderStatus::Preparing,
            "en_camino" => OrderStatus::InTransit,
            "entregado" => OrderStatus::Delivered,
            "cancelado" => OrderStatus::Cancelled,
            "rechazado" => OrderStatus::Rejected,
            other => OrderStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(raw: String) -> Self {
        OrderStatus::from(raw.as_str())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchase of a quoted prescription (`pedidos/{id}`).
///
/// `payment_date` and `closed_at` are both optional but mean different
/// things: an unpaid order serialises `payment_date` as `null`, while an
/// order that was never closed omits `closed_at` entirely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub receta_id: String,
    pub quote_id: String,
    pub pharmacy_id: String,
    pub price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Serialises as `null` while unpaid.
    pub payment_date: Option<DateTime<Utc>>,
    /// Omitted from the serialised order until the order is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub payment_id: Option<String>,
    pub payment_status: Option<String>,
    pub pharmacy_name: Option<String>,
    pub delivery_address: Option<String>,
    pub image_url: Option<String>,
}

/// The in-flight order of a prescription (`PedidoActivoReceta`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveOrder {
    pub id: String,
    pub status: OrderStatus,
    pub quote_id: String,
    pub pharmacy_name: String,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub payment_id: Option<String>,
}

impl From<&Order> for ActiveOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.clone(),
            status: order.status.clone(),
            quote_id: order.quote_id.clone(),
            pharmacy_name: order
                .pharmacy_name
                .clone()
                .unwrap_or_else(|| PHARMACY_NAME_PLACEHOLDER.to_string()),
            price: order.price,
            created_at: order.created_at,
            payment_id: order.payment_id.clone(),
        }
    }
}
