//! Scripted [`BrokerApi`] for unit tests, keyed by endpoint URL.

use async_trait::async_trait;
use fleet::{
    Endpoint, Funds, OrderRequest, PingInfo, Position, Quote, RemoteError, RemoteOrder, Trade,
    TradingMode,
};
use gateway_client::BrokerApi;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Script {
    /// Every call against these URLs fails with a 503 (after "retries").
    down: HashSet<String>,
    /// `ping` against these URLs panics.
    panicking: HashSet<String>,
    /// Closure calls fail but still flatten the book.
    closure_fails: HashSet<String>,
    /// Closure calls report success but leave positions open.
    sticky: HashSet<String>,
    /// The position book comes back unreadable.
    book_fails: HashSet<String>,
    funds: HashMap<String, Funds>,
    trades: HashMap<String, Vec<Trade>>,
    positions: HashMap<String, Vec<Position>>,
    orders: HashMap<String, Vec<RemoteOrder>>,
    modes: HashMap<String, TradingMode>,
    quotes: HashMap<String, Vec<Quote>>,
    /// `ping` takes this long before answering.
    ping_delay: Option<Duration>,
    /// Quote requests for these exchanges fail.
    bad_exchanges: HashSet<String>,
    calls: Vec<(String, &'static str)>,
    next_order: u64,
}

#[derive(Default)]
pub(crate) struct MockBroker {
    script: Mutex<Script>,
}

fn down(op: &str) -> RemoteError {
    RemoteError::transient(Some(503), format!("{} unavailable", op))
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<F: FnOnce(&mut Script)>(self, f: F) -> Self {
        f(&mut self.script.lock().unwrap());
        self
    }

    pub fn down(self, url: &str) -> Self {
        self.with(|s| {
            s.down.insert(url.to_string());
        })
    }

    pub fn panicking(self, url: &str) -> Self {
        self.with(|s| {
            s.panicking.insert(url.to_string());
        })
    }

    pub fn closure_fails(self, url: &str) -> Self {
        self.with(|s| {
            s.closure_fails.insert(url.to_string());
        })
    }

    pub fn sticky(self, url: &str) -> Self {
        self.with(|s| {
            s.sticky.insert(url.to_string());
        })
    }

    pub fn book_fails(self, url: &str) -> Self {
        self.with(|s| {
            s.book_fails.insert(url.to_string());
        })
    }

    pub fn funds(self, url: &str, fields: serde_json::Value) -> Self {
        let funds: Funds = serde_json::from_value(fields).unwrap();
        self.with(|s| {
            s.funds.insert(url.to_string(), funds);
        })
    }

    pub fn trades(self, url: &str, trades: Vec<Trade>) -> Self {
        self.with(|s| {
            s.trades.insert(url.to_string(), trades);
        })
    }

    pub fn positions(self, url: &str, positions: Vec<Position>) -> Self {
        self.with(|s| {
            s.positions.insert(url.to_string(), positions);
        })
    }

    pub fn orders(self, url: &str, orders: Vec<RemoteOrder>) -> Self {
        self.with(|s| {
            s.orders.insert(url.to_string(), orders);
        })
    }

    pub fn mode(self, url: &str, mode: TradingMode) -> Self {
        self.with(|s| {
            s.modes.insert(url.to_string(), mode);
        })
    }

    pub fn quotes(self, url: &str, quotes: Vec<Quote>) -> Self {
        self.with(|s| {
            s.quotes.insert(url.to_string(), quotes);
        })
    }

    pub fn ping_delay(self, delay: Duration) -> Self {
        self.with(|s| s.ping_delay = Some(delay))
    }

    pub fn bad_exchange(self, exchange: &str) -> Self {
        self.with(|s| {
            s.bad_exchanges.insert(exchange.to_string());
        })
    }

    pub fn remote_mode(&self, url: &str) -> TradingMode {
        self.script
            .lock()
            .unwrap()
            .modes
            .get(url)
            .copied()
            .unwrap_or_default()
    }

    /// Operations called against `url`, in order.
    pub fn calls(&self, url: &str) -> Vec<&'static str> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, op)| *op)
            .collect()
    }

    fn enter(&self, endpoint: &Endpoint, op: &'static str) -> Result<std::sync::MutexGuard<'_, Script>, RemoteError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push((endpoint.url().to_string(), op));
        if script.down.contains(endpoint.url()) {
            return Err(down(op));
        }
        Ok(script)
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn ping(&self, endpoint: &Endpoint) -> Result<PingInfo, RemoteError> {
        let (panics, delay) = {
            let script = self.enter(endpoint, "ping")?;
            (script.panicking.contains(endpoint.url()), script.ping_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panics {
            panic!("ping handler crashed for {}", endpoint.url());
        }
        Ok(PingInfo {
            broker: Some("mockbroker".to_string()),
            message: Some("pong".to_string()),
        })
    }

    async fn funds(&self, endpoint: &Endpoint) -> Result<Funds, RemoteError> {
        let script = self.enter(endpoint, "funds")?;
        Ok(script.funds.get(endpoint.url()).cloned().unwrap_or_default())
    }

    async fn positions(&self, endpoint: &Endpoint) -> Result<Vec<Position>, RemoteError> {
        let script = self.enter(endpoint, "positionbook")?;
        if script.book_fails.contains(endpoint.url()) {
            return Err(RemoteError::permanent(None, "malformed position: unreadable quantity \"N/A\""));
        }
        Ok(script.positions.get(endpoint.url()).cloned().unwrap_or_default())
    }

    async fn trades(&self, endpoint: &Endpoint) -> Result<Vec<Trade>, RemoteError> {
        let script = self.enter(endpoint, "tradebook")?;
        Ok(script.trades.get(endpoint.url()).cloned().unwrap_or_default())
    }

    async fn orders(&self, endpoint: &Endpoint) -> Result<Vec<RemoteOrder>, RemoteError> {
        let script = self.enter(endpoint, "orderbook")?;
        Ok(script.orders.get(endpoint.url()).cloned().unwrap_or_default())
    }

    async fn place_order(
        &self,
        endpoint: &Endpoint,
        _strategy: &str,
        _order: &OrderRequest,
    ) -> Result<String, RemoteError> {
        let mut script = self.enter(endpoint, "placeorder")?;
        script.next_order += 1;
        Ok(format!("MOCK{}", script.next_order))
    }

    async fn cancel_order(
        &self,
        endpoint: &Endpoint,
        _strategy: &str,
        _order_id: &str,
    ) -> Result<(), RemoteError> {
        self.enter(endpoint, "cancelorder")?;
        Ok(())
    }

    async fn cancel_all_orders(&self, endpoint: &Endpoint, _strategy: &str) -> Result<(), RemoteError> {
        let script = self.enter(endpoint, "cancelallorder")?;
        if script.closure_fails.contains(endpoint.url()) {
            return Err(RemoteError::permanent(Some(400), "cancel rejected"));
        }
        Ok(())
    }

    async fn close_all_positions(&self, endpoint: &Endpoint, _strategy: &str) -> Result<(), RemoteError> {
        let mut script = self.enter(endpoint, "closeposition")?;
        let url = endpoint.url().to_string();
        if !script.sticky.contains(&url) {
            script.positions.remove(&url);
        }
        if script.closure_fails.contains(&url) {
            return Err(RemoteError::permanent(Some(200), "square-off partially failed"));
        }
        Ok(())
    }

    async fn analyzer_status(&self, endpoint: &Endpoint) -> Result<TradingMode, RemoteError> {
        let script = self.enter(endpoint, "analyzer")?;
        Ok(script.modes.get(endpoint.url()).copied().unwrap_or_default())
    }

    async fn set_trading_mode(
        &self,
        endpoint: &Endpoint,
        mode: TradingMode,
    ) -> Result<TradingMode, RemoteError> {
        let mut script = self.enter(endpoint, "analyzer/toggle")?;
        script.modes.insert(endpoint.url().to_string(), mode);
        Ok(mode)
    }

    async fn quotes(
        &self,
        endpoint: &Endpoint,
        exchange: &str,
        symbols: &[String],
    ) -> Result<Vec<Quote>, RemoteError> {
        let script = self.enter(endpoint, "multiquotes")?;
        if script.bad_exchanges.contains(exchange) {
            return Err(RemoteError::permanent(Some(400), format!("exchange {} not enabled", exchange)));
        }
        Ok(script
            .quotes
            .get(endpoint.url())
            .map(|quotes| {
                quotes
                    .iter()
                    .filter(|q| q.exchange == exchange && symbols.contains(&q.symbol))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
