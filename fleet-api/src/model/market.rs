use super::ids::WatchlistId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Net quantities below this are treated as flat.
pub const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => Ok(Side::Buy),
            "SELL" | "S" => Ok(Side::Sell),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// An executed fill from the remote ledger. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    symbol: String,
    exchange: Option<String>,
    side: Side,
    quantity: f64,
    price: f64,
    timestamp: DateTime<Utc>,
    order_id: Option<String>,
    /// Per-trade P&L, when the remote computes it.
    pnl: Option<f64>,
}

impl Trade {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: None,
            side,
            quantity,
            price,
            timestamp,
            order_id: None,
            pnl: None,
        }
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_pnl(mut self, pnl: f64) -> Self {
        self.pnl = Some(pnl);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn pnl(&self) -> Option<f64> {
        self.pnl
    }
}

/// Remote-reported open exposure, refreshed every poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    symbol: String,
    exchange: Option<String>,
    product: Option<String>,
    /// Signed net quantity. Zero means the position is closed.
    quantity: f64,
    average_price: f64,
    ltp: Option<f64>,
    pnl: f64,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: f64, average_price: f64, pnl: f64) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: None,
            product: None,
            quantity,
            average_price,
            ltp: None,
            pnl,
        }
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_ltp(mut self, ltp: f64) -> Self {
        self.ltp = Some(ltp);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn average_price(&self) -> f64 {
        self.average_price
    }

    pub fn ltp(&self) -> Option<f64> {
        self.ltp
    }

    pub fn pnl(&self) -> f64 {
        self.pnl
    }

    pub fn is_open(&self) -> bool {
        self.quantity.abs() > QTY_EPSILON
    }
}

/// Latest market snapshot for one `(exchange, symbol)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub exchange: String,
    pub symbol: String,
    pub ltp: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub prev_close: Option<f64>,
    pub volume: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>, ltp: f64) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            ltp,
            open: None,
            high: None,
            low: None,
            prev_close: None,
            volume: None,
            bid: None,
            ask: None,
            updated_at: Utc::now(),
        }
    }

    /// Storage key, unique per `(exchange, symbol)`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.exchange, self.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistSymbol {
    pub symbol: String,
    pub exchange: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl WatchlistSymbol {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: WatchlistId,
    pub name: String,
    pub symbols: Vec<WatchlistSymbol>,
}

impl Watchlist {
    pub fn new(id: WatchlistId, name: impl Into<String>, symbols: Vec<WatchlistSymbol>) -> Self {
        Self {
            id,
            name: name.into(),
            symbols,
        }
    }
}
