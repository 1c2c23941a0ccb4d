use crate::client::GatewayClient;
use crate::wire;
use async_trait::async_trait;
use fleet::{
    Endpoint, Funds, OrderRequest, PingInfo, Position, Quote, RemoteError, RemoteOrder, Trade,
    TradingMode,
};
use reqwest::Method;
use serde_json::{json, Value};

/// Typed operations on one remote instance.
///
/// Implemented by [`GatewayClient`] over HTTP; the lifecycle manager only
/// depends on this trait, so tests swap in a scripted broker.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Connectivity check.
    async fn ping(&self, endpoint: &Endpoint) -> Result<PingInfo, RemoteError>;

    async fn funds(&self, endpoint: &Endpoint) -> Result<Funds, RemoteError>;

    async fn positions(&self, endpoint: &Endpoint) -> Result<Vec<Position>, RemoteError>;

    async fn trades(&self, endpoint: &Endpoint) -> Result<Vec<Trade>, RemoteError>;

    async fn orders(&self, endpoint: &Endpoint) -> Result<Vec<RemoteOrder>, RemoteError>;

    /// Places an order tagged with `strategy`; returns the remote order id.
    async fn place_order(
        &self,
        endpoint: &Endpoint,
        strategy: &str,
        order: &OrderRequest,
    ) -> Result<String, RemoteError>;

    async fn cancel_order(
        &self,
        endpoint: &Endpoint,
        strategy: &str,
        order_id: &str,
    ) -> Result<(), RemoteError>;

    /// Cancels every open order of `strategy`.
    async fn cancel_all_orders(&self, endpoint: &Endpoint, strategy: &str) -> Result<(), RemoteError>;

    /// Squares off every position of `strategy`.
    async fn close_all_positions(&self, endpoint: &Endpoint, strategy: &str) -> Result<(), RemoteError>;

    async fn analyzer_status(&self, endpoint: &Endpoint) -> Result<TradingMode, RemoteError>;

    /// Switches the remote mode and returns the mode the remote reports afterwards.
    async fn set_trading_mode(
        &self,
        endpoint: &Endpoint,
        mode: TradingMode,
    ) -> Result<TradingMode, RemoteError>;

    /// One batched quote request for `symbols` on `exchange`.
    async fn quotes(
        &self,
        endpoint: &Endpoint,
        exchange: &str,
        symbols: &[String],
    ) -> Result<Vec<Quote>, RemoteError>;
}

impl GatewayClient {
    async fn post(&self, endpoint: &Endpoint, operation: &str, payload: Value) -> Result<Value, RemoteError> {
        self.call(endpoint, operation, payload, Method::POST).await
    }
}

#[async_trait]
impl BrokerApi for GatewayClient {
    async fn ping(&self, endpoint: &Endpoint) -> Result<PingInfo, RemoteError> {
        let envelope = self.post(endpoint, "ping", json!({})).await?;
        wire::ping_info(&envelope)
    }

    async fn funds(&self, endpoint: &Endpoint) -> Result<Funds, RemoteError> {
        let envelope = self.post(endpoint, "funds", json!({})).await?;
        match wire::data(&envelope) {
            Value::Null => Ok(Funds::default()),
            value => wire::decode(value, "funds"),
        }
    }

    async fn positions(&self, endpoint: &Endpoint) -> Result<Vec<Position>, RemoteError> {
        let envelope = self.post(endpoint, "positionbook", json!({})).await?;
        wire::positions(&envelope)
    }

    async fn trades(&self, endpoint: &Endpoint) -> Result<Vec<Trade>, RemoteError> {
        let envelope = self.post(endpoint, "tradebook", json!({})).await?;
        wire::trades(&envelope)
    }

    async fn orders(&self, endpoint: &Endpoint) -> Result<Vec<RemoteOrder>, RemoteError> {
        let envelope = self.post(endpoint, "orderbook", json!({})).await?;
        wire::orders(&envelope)
    }

    async fn place_order(
        &self,
        endpoint: &Endpoint,
        strategy: &str,
        order: &OrderRequest,
    ) -> Result<String, RemoteError> {
        let (pricetype, price) = match order.price {
            Some(price) => ("LIMIT", price),
            None => ("MARKET", 0.0),
        };
        let payload = json!({
            "strategy": strategy,
            "symbol": order.symbol,
            "exchange": order.exchange,
            "action": order.side.to_string(),
            "quantity": order.quantity,
            "pricetype": pricetype,
            "price": price,
            "product": order.product,
        });
        let envelope = self.post(endpoint, "placeorder", payload).await?;
        wire::order_id(&envelope)
    }

    async fn cancel_order(
        &self,
        endpoint: &Endpoint,
        strategy: &str,
        order_id: &str,
    ) -> Result<(), RemoteError> {
        self.post(
            endpoint,
            "cancelorder",
            json!({"strategy": strategy, "orderid": order_id}),
        )
        .await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, endpoint: &Endpoint, strategy: &str) -> Result<(), RemoteError> {
        self.post(endpoint, "cancelallorder", json!({"strategy": strategy}))
            .await?;
        Ok(())
    }

    async fn close_all_positions(&self, endpoint: &Endpoint, strategy: &str) -> Result<(), RemoteError> {
        self.post(endpoint, "closeposition", json!({"strategy": strategy}))
            .await?;
        Ok(())
    }

    async fn analyzer_status(&self, endpoint: &Endpoint) -> Result<TradingMode, RemoteError> {
        let envelope = self.post(endpoint, "analyzer", json!({})).await?;
        wire::analyzer_flag(&envelope).map(TradingMode::from_analyzer)
    }

    async fn set_trading_mode(
        &self,
        endpoint: &Endpoint,
        mode: TradingMode,
    ) -> Result<TradingMode, RemoteError> {
        let envelope = self
            .post(endpoint, "analyzer/toggle", json!({"mode": mode.is_analyzer()}))
            .await?;
        // Some remotes acknowledge without echoing the mode.
        Ok(wire::analyzer_flag(&envelope)
            .map(TradingMode::from_analyzer)
            .unwrap_or(mode))
    }

    async fn quotes(
        &self,
        endpoint: &Endpoint,
        exchange: &str,
        symbols: &[String],
    ) -> Result<Vec<Quote>, RemoteError> {
        let symbols: Vec<Value> = symbols
            .iter()
            .map(|symbol| json!({"symbol": symbol, "exchange": exchange}))
            .collect();
        let envelope = self
            .post(endpoint, "multiquotes", json!({"symbols": symbols}))
            .await?;
        wire::quotes(&envelope, exchange)
    }
}
