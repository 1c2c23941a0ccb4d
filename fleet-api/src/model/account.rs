use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names under which remotes report realized P&L, most authoritative first.
const REALIZED_FIELDS: [&str; 4] = ["m2mrealized", "realized_pnl", "realised_pnl", "realizedpnl"];

/// Field names under which remotes report spendable cash.
const BALANCE_FIELDS: [&str; 3] = ["availablecash", "available_balance", "balance"];

/// Reads a remote numeric field. Remotes send numbers either as JSON numbers
/// or as numeric strings (`"1250.50"`); both are accepted.
pub fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// The funds/margin block reported by a remote instance.
///
/// Kept as a raw field map because brokers disagree on field names; the
/// accessors walk a fallback chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Funds(Map<String, Value>);

impl Funds {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    fn first_number(&self, names: &[&str]) -> Option<f64> {
        names
            .iter()
            .find_map(|name| self.0.get(*name).and_then(number))
    }

    /// Authoritative realized P&L, if the remote reports one.
    pub fn realized(&self) -> Option<f64> {
        self.first_number(&REALIZED_FIELDS)
    }

    pub fn balance(&self) -> Option<f64> {
        self.first_number(&BALANCE_FIELDS)
    }
}

/// Reply of a connectivity check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingInfo {
    pub broker: Option<String>,
    pub message: Option<String>,
}
