//! Remote reply shapes.
//!
//! Remotes are loose about types: numbers arrive as strings, ids as numbers,
//! timestamps in several layouts. Everything is read leniently here and then
//! converted into the strict `fleet` model; a reply that cannot be converted
//! is a permanent (malformed) failure.

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use fleet::{number, OrderStatus, PingInfo, Position, Quote, RemoteError, RemoteOrder, Side, Trade};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%d-%b-%Y %H:%M:%S",
];

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(number(&value).unwrap_or(0.0))
}

/// A quantity must be present and finite: reading an unknown value as zero
/// would make an open position look flat.
fn strict_quantity<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(d)?;
    match number(&value) {
        Some(qty) if qty.is_finite() => Ok(qty),
        _ => Err(serde::de::Error::custom(format!("unreadable quantity {}", value))),
    }
}

fn lenient_opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(number(&value))
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Parses the timestamp layouts seen in remote trade books. Time-only values
/// are placed on the current UTC date.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            // Heuristic: anything past 1e12 is already in milliseconds.
            let millis = if raw.abs() >= 1e12 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in DATETIME_FORMATS {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
                let naive = Utc::now().date_naive().and_time(time);
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(n) = s.parse::<f64>() {
                return parse_timestamp(&serde_json::json!(n));
            }
            None
        }
        _ => None,
    }
}

fn malformed(what: &str, detail: impl std::fmt::Display) -> RemoteError {
    RemoteError::permanent(None, format!("malformed {}: {}", what, detail))
}

/// Deserializes `value` or reports a malformed reply.
pub fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, RemoteError> {
    serde_json::from_value(value).map_err(|e| malformed(what, e))
}

/// The `data` member of a reply envelope. A missing or `null` member reads as `Null`.
pub fn data(envelope: &Value) -> Value {
    envelope.get("data").cloned().unwrap_or(Value::Null)
}

/// A list-valued `data` member; `null` means an empty book.
pub fn list(envelope: &Value, what: &str) -> Result<Vec<Value>, RemoteError> {
    match data(envelope) {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(malformed(what, format!("expected a list, got {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct RawPing {
    #[serde(default, deserialize_with = "lenient_string")]
    broker: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    message: Option<String>,
}

pub fn ping_info(envelope: &Value) -> Result<PingInfo, RemoteError> {
    match data(envelope) {
        Value::Null => Ok(PingInfo::default()),
        value => {
            let raw: RawPing = decode(value, "ping reply")?;
            Ok(PingInfo {
                broker: raw.broker,
                message: raw.message,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    symbol: String,
    #[serde(default, deserialize_with = "lenient_string")]
    exchange: Option<String>,
    #[serde(alias = "side", alias = "transaction_type")]
    action: String,
    #[serde(deserialize_with = "strict_quantity")]
    quantity: f64,
    #[serde(default, alias = "price", deserialize_with = "lenient_number")]
    average_price: f64,
    #[serde(default)]
    timestamp: Value,
    #[serde(default, alias = "order_id", deserialize_with = "lenient_string")]
    orderid: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_number")]
    pnl: Option<f64>,
}

impl RawTrade {
    fn into_trade(self) -> Result<Trade, RemoteError> {
        let side: Side = self.action.parse().map_err(|e| malformed("trade", e))?;
        // Unparsable timestamps sort first; ties keep the remote order.
        let timestamp = parse_timestamp(&self.timestamp).unwrap_or_default();
        let mut trade = Trade::new(self.symbol, side, self.quantity.abs(), self.average_price, timestamp);
        if let Some(exchange) = self.exchange {
            trade = trade.with_exchange(exchange);
        }
        if let Some(order_id) = self.orderid {
            trade = trade.with_order_id(order_id);
        }
        if let Some(pnl) = self.pnl {
            trade = trade.with_pnl(pnl);
        }
        Ok(trade)
    }
}

pub fn trades(envelope: &Value) -> Result<Vec<Trade>, RemoteError> {
    list(envelope, "trade book")?
        .into_iter()
        .map(|item| decode::<RawTrade>(item, "trade")?.into_trade())
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    symbol: String,
    #[serde(default, deserialize_with = "lenient_string")]
    exchange: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    product: Option<String>,
    #[serde(alias = "netqty", deserialize_with = "strict_quantity")]
    quantity: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    average_price: f64,
    #[serde(default, deserialize_with = "lenient_opt_number")]
    ltp: Option<f64>,
    #[serde(default, alias = "unrealized_pnl", deserialize_with = "lenient_number")]
    pnl: f64,
}

pub fn positions(envelope: &Value) -> Result<Vec<Position>, RemoteError> {
    list(envelope, "position book")?
        .into_iter()
        .map(|item| {
            let raw: RawPosition = decode(item, "position")?;
            let mut position = Position::new(raw.symbol, raw.quantity, raw.average_price, raw.pnl);
            if let Some(exchange) = raw.exchange {
                position = position.with_exchange(exchange);
            }
            if let Some(product) = raw.product {
                position = position.with_product(product);
            }
            if let Some(ltp) = raw.ltp {
                position = position.with_ltp(ltp);
            }
            Ok(position)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    #[serde(default, alias = "order_id", deserialize_with = "lenient_string")]
    orderid: Option<String>,
    #[serde(default)]
    symbol: String,
    #[serde(default, deserialize_with = "lenient_string")]
    exchange: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    quantity: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    price: f64,
    #[serde(default, alias = "status", deserialize_with = "lenient_string")]
    order_status: Option<String>,
    #[serde(default, alias = "filled_qty", deserialize_with = "lenient_opt_number")]
    filled_quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_number")]
    average_price: Option<f64>,
}

pub fn orders(envelope: &Value) -> Result<Vec<RemoteOrder>, RemoteError> {
    // Either `data: {orders: [...], statistics: {...}}` or a bare list.
    let items = match data(envelope) {
        Value::Object(mut map) => match map.remove("orders") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => return Err(malformed("order book", format!("orders is {}", other))),
        },
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => return Err(malformed("order book", other)),
    };

    let mut orders = Vec::with_capacity(items.len());
    for item in items {
        let raw: RawOrder = decode(item, "order")?;
        let Some(order_id) = raw.orderid else {
            continue;
        };
        orders.push(RemoteOrder {
            order_id,
            symbol: raw.symbol,
            exchange: raw.exchange,
            side: raw.action.and_then(|a| a.parse().ok()),
            quantity: raw.quantity,
            price: raw.price,
            status: raw
                .order_status
                .as_deref()
                .map(OrderStatus::parse)
                .unwrap_or(OrderStatus::Unknown),
            filled_quantity: raw.filled_quantity,
            average_price: raw.average_price,
        });
    }
    Ok(orders)
}

/// Order id of a `placeorder` reply: top level or inside `data`.
pub fn order_id(envelope: &Value) -> Result<String, RemoteError> {
    let candidate = envelope
        .get("orderid")
        .or_else(|| envelope.get("data").and_then(|d| d.get("orderid")));
    match candidate {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(malformed("order reply", "missing 'orderid'")),
    }
}

/// Analyzer flag from an `analyzer` or `analyzer/toggle` reply.
pub fn analyzer_flag(envelope: &Value) -> Result<bool, RemoteError> {
    let data = data(envelope);
    if let Some(flag) = data.get("analyze_mode").and_then(Value::as_bool) {
        return Ok(flag);
    }
    match data.get("mode").and_then(Value::as_str) {
        Some(mode) if mode.eq_ignore_ascii_case("analyze") || mode.eq_ignore_ascii_case("analyzer") => Ok(true),
        Some(mode) if mode.eq_ignore_ascii_case("live") => Ok(false),
        _ => Err(malformed("analyzer reply", "missing 'analyze_mode'")),
    }
}

/// Quotes of a `multiquotes` reply. Entries the remote could not price are skipped.
pub fn quotes(envelope: &Value, exchange: &str) -> Result<Vec<Quote>, RemoteError> {
    let now = Utc::now();
    let mut quotes = Vec::new();
    for item in list(envelope, "quote list")? {
        let Some(symbol) = item.get("symbol").and_then(Value::as_str) else {
            continue;
        };
        let fields = match item.get("data") {
            Some(d) if d.is_object() => d,
            _ => continue,
        };
        let field = |name: &str| fields.get(name).and_then(number);
        let Some(ltp) = field("ltp") else {
            continue;
        };
        // Same casing as the watchlist exchange groups.
        let quote_exchange = item
            .get("exchange")
            .and_then(Value::as_str)
            .unwrap_or(exchange)
            .to_uppercase();

        let mut quote = Quote::new(quote_exchange, symbol, ltp);
        quote.open = field("open");
        quote.high = field("high");
        quote.low = field("low");
        quote.prev_close = field("prev_close");
        quote.volume = field("volume");
        quote.bid = field("bid");
        quote.ask = field("ask");
        quote.updated_at = now;
        quotes.push(quote);
    }
    Ok(quotes)
}
