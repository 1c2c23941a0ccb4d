use super::ids::InstanceId;
use super::market::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an order as reported by a remote order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Working on the exchange.
    Open,
    /// Accepted by the broker, not yet working (validation, trigger pending).
    Pending,
    Complete,
    Cancelled,
    Rejected,
    Unknown,
}

impl OrderStatus {
    /// Maps the free-form status strings brokers report.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => OrderStatus::Open,
            "pending" | "trigger pending" | "validation pending" | "put order req received" => {
                OrderStatus::Pending
            }
            "complete" | "completed" | "filled" | "executed" | "traded" => OrderStatus::Complete,
            "cancelled" | "canceled" => OrderStatus::Cancelled,
            "rejected" => OrderStatus::Rejected,
            _ => OrderStatus::Unknown,
        }
    }

    /// Terminal orders are never reconciled again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// An order as it appears in the remote order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub order_id: String,
    pub symbol: String,
    pub exchange: Option<String>,
    pub side: Option<Side>,
    pub quantity: f64,
    pub price: f64,
    pub status: OrderStatus,
    pub filled_quantity: Option<f64>,
    pub average_price: Option<f64>,
}

/// Request to place an order through an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub quantity: f64,
    /// `None` places a market order.
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default = "default_product")]
    pub product: String,
}

fn default_product() -> String {
    "MIS".to_string()
}

impl OrderRequest {
    pub fn market(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        side: Side,
        quantity: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            side,
            quantity,
            price: None,
            product: default_product(),
        }
    }

    pub fn with_limit(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }
}

/// Local bookkeeping row for an order placed through an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub instance_id: InstanceId,
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn placed(instance_id: InstanceId, order_id: impl Into<String>, request: &OrderRequest) -> Self {
        Self {
            order_id: order_id.into(),
            instance_id,
            symbol: request.symbol.clone(),
            exchange: request.exchange.clone(),
            side: request.side,
            quantity: request.quantity,
            price: request.price.unwrap_or(0.0),
            status: OrderStatus::Open,
            filled_quantity: 0.0,
            average_price: None,
            updated_at: Utc::now(),
        }
    }

    /// Folds the remote view into this record. Returns whether anything changed.
    pub fn reconcile(&mut self, remote: &RemoteOrder) -> bool {
        let filled = remote.filled_quantity.unwrap_or(self.filled_quantity);
        let average = remote.average_price.or(self.average_price);
        let changed = self.status != remote.status
            || (self.filled_quantity - filled).abs() > f64::EPSILON
            || self.average_price != average;
        if changed {
            self.status = remote.status;
            self.filled_quantity = filled;
            self.average_price = average;
            self.updated_at = Utc::now();
        }
        changed
    }
}
