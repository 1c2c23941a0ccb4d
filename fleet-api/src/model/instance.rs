//! A managed instance: one remote broker gateway and the local bookkeeping
//! the orchestrator keeps about it.

use super::ids::InstanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_strategy_tag() -> String {
    "fleet".to_string()
}

fn default_active() -> bool {
    true
}

/// API key of a remote instance.
///
/// `Debug` and [`Credential::masked`] never reveal the raw key; only the
/// gateway client reads it through [`Credential::expose`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First and last four characters, `****` for anything shorter than nine.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "****".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}****{}", head, tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

/// Where and how to reach a remote instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    url: String,
    api_key: Credential,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, api_key: Credential) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api_key(&self) -> &Credential {
        &self.api_key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Live trading or simulated ("analyzer") trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Live,
    Analyzer,
}

impl TradingMode {
    pub fn from_analyzer(analyzer: bool) -> Self {
        if analyzer {
            TradingMode::Analyzer
        } else {
            TradingMode::Live
        }
    }

    pub fn is_analyzer(&self) -> bool {
        *self == TradingMode::Analyzer
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Analyzer => write!(f, "analyzer"),
        }
    }
}

/// Which instance supplies quotes for watchlists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketDataRole {
    #[default]
    None,
    Primary,
    Secondary,
}

/// Profit/loss thresholds. An unset threshold is never hit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskTargets {
    pub target_profit: Option<f64>,
    pub target_loss: Option<f64>,
}

/// Last computed P&L figures of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PnlSnapshot {
    realized: f64,
    unrealized: f64,
    total: f64,
    balance: f64,
}

impl PnlSnapshot {
    /// `total` is always `realized + unrealized`.
    pub fn new(realized: f64, unrealized: f64, balance: f64) -> Self {
        Self {
            realized,
            unrealized,
            total: realized + unrealized,
            balance,
        }
    }

    pub fn realized(&self) -> f64 {
        self.realized
    }

    pub fn unrealized(&self) -> f64 {
        self.unrealized
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    pub fn checked_now(status: HealthStatus) -> Self {
        Self {
            status,
            last_checked: Some(Utc::now()),
        }
    }
}

/// Registration request for a new instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInstance {
    pub name: String,
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(default = "default_strategy_tag")]
    pub strategy_tag: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub market_data_role: MarketDataRole,
    #[serde(flatten)]
    pub targets: RiskTargets,
}

impl NewInstance {
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
            strategy_tag: default_strategy_tag(),
            active: true,
            market_data_role: MarketDataRole::None,
            targets: RiskTargets::default(),
        }
    }

    pub fn with_strategy_tag(mut self, tag: impl Into<String>) -> Self {
        self.strategy_tag = tag.into();
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_market_data_role(mut self, role: MarketDataRole) -> Self {
        self.market_data_role = role;
        self
    }

    pub fn with_targets(mut self, target_profit: Option<f64>, target_loss: Option<f64>) -> Self {
        self.targets = RiskTargets {
            target_profit,
            target_loss,
        };
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    id: InstanceId,
    name: String,
    endpoint: Endpoint,
    strategy_tag: String,
    active: bool,
    mode: TradingMode,
    market_data_role: MarketDataRole,
    targets: RiskTargets,
    pnl: PnlSnapshot,
    last_pnl_update: Option<DateTime<Utc>>,
    health: HealthSnapshot,
    broker: Option<String>,
}

impl Instance {
    pub fn new(id: InstanceId, new: NewInstance) -> Self {
        Self {
            id,
            name: new.name,
            endpoint: new.endpoint,
            strategy_tag: new.strategy_tag,
            active: new.active,
            mode: TradingMode::Live,
            market_data_role: new.market_data_role,
            targets: new.targets,
            pnl: PnlSnapshot::default(),
            last_pnl_update: None,
            health: HealthSnapshot::default(),
            broker: None,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn strategy_tag(&self) -> &str {
        &self.strategy_tag
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn market_data_role(&self) -> MarketDataRole {
        self.market_data_role
    }

    pub fn targets(&self) -> RiskTargets {
        self.targets
    }

    pub fn pnl(&self) -> PnlSnapshot {
        self.pnl
    }

    pub fn last_pnl_update(&self) -> Option<DateTime<Utc>> {
        self.last_pnl_update
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health
    }

    pub fn broker(&self) -> Option<&str> {
        self.broker.as_deref()
    }

    /// `name#id`, used in log lines.
    pub fn label(&self) -> String {
        format!("{}#{}", self.name, self.id)
    }

    /// Applies a field-level patch. Fields left as `None` are untouched.
    pub fn apply(&mut self, update: &InstanceUpdate) {
        if let Some(active) = update.active {
            self.active = active;
        }
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(role) = update.market_data_role {
            self.market_data_role = role;
        }
        if let Some(targets) = update.targets {
            self.targets = targets;
        }
        if let Some((pnl, at)) = update.pnl {
            self.pnl = pnl;
            self.last_pnl_update = Some(at);
        }
        if let Some(health) = update.health {
            self.health = health;
        }
        if let Some(broker) = &update.broker {
            self.broker = Some(broker.clone());
        }
    }
}

/// Field-level patch of an instance row.
///
/// The health loop and the instance loop write disjoint fields, so applying
/// patches instead of whole rows keeps them from overwriting each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceUpdate {
    active: Option<bool>,
    mode: Option<TradingMode>,
    market_data_role: Option<MarketDataRole>,
    targets: Option<RiskTargets>,
    pnl: Option<(PnlSnapshot, DateTime<Utc>)>,
    health: Option<HealthSnapshot>,
    broker: Option<String>,
}

impl InstanceUpdate {
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn with_mode(mut self, mode: TradingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_market_data_role(mut self, role: MarketDataRole) -> Self {
        self.market_data_role = Some(role);
        self
    }

    pub fn with_targets(mut self, targets: RiskTargets) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn with_pnl(mut self, pnl: PnlSnapshot, at: DateTime<Utc>) -> Self {
        self.pnl = Some((pnl, at));
        self
    }

    pub fn with_health(mut self, health: HealthSnapshot) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_broker(mut self, broker: impl Into<String>) -> Self {
        self.broker = Some(broker.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == InstanceUpdate::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceFilter {
    All,
    Active,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &Instance) -> bool {
        match self {
            InstanceFilter::All => true,
            InstanceFilter::Active => instance.is_active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Instance {
        let endpoint = Endpoint::new(
            "http://127.0.0.1:5000",
            Credential::new("abcd1234567890wxyz"),
        );
        Instance::new(InstanceId::new(1), NewInstance::new("alpha", endpoint))
    }

    #[test]
    fn test_credential_masking() {
        let key = Credential::new("abcd1234567890wxyz");
        assert_eq!(key.masked(), "abcd****wxyz");
        assert_eq!(format!("{:?}", key), "Credential(abcd****wxyz)");
        assert_eq!(Credential::new("short").masked(), "****");
        assert_eq!(Credential::new("12345678").masked(), "****");
    }

    #[test]
    fn test_debug_output_never_contains_raw_key() {
        let instance = sample();
        let rendered = format!("{:?}", instance);
        assert!(!rendered.contains("abcd1234567890wxyz"));
        assert!(rendered.contains("abcd****wxyz"));
    }

    #[test]
    fn test_apply_only_touches_patched_fields() {
        let mut instance = sample();
        let at = Utc::now();
        instance.apply(&InstanceUpdate::default().with_pnl(PnlSnapshot::new(10.0, -4.0, 500.0), at));

        assert_eq!(instance.pnl().total(), 6.0);
        assert_eq!(instance.last_pnl_update(), Some(at));
        assert_eq!(instance.health().status, HealthStatus::Unknown);
        assert_eq!(instance.mode(), TradingMode::Live);

        instance.apply(&InstanceUpdate::default().with_mode(TradingMode::Analyzer));
        assert!(instance.mode().is_analyzer());
        assert_eq!(instance.pnl().total(), 6.0);
    }

    #[test]
    fn test_new_instance_deserializes_with_defaults() {
        let json = r#"{"name": "beta", "url": "http://host:5000", "api_key": "k"}"#;
        let new: NewInstance = serde_json::from_str(json).unwrap();
        assert_eq!(new.strategy_tag, "fleet");
        assert!(new.active);
        assert_eq!(new.market_data_role, MarketDataRole::None);
        assert_eq!(new.targets, RiskTargets::default());
        assert_eq!(new.endpoint.url(), "http://host:5000");
    }
}
