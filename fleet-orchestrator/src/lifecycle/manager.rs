use chrono::Utc;
use fleet::{
    FleetError, HealthSnapshot, HealthStatus, Instance, InstanceFilter, InstanceId,
    InstanceUpdate, NewInstance, OrderRecord, OrderRequest, OrderStatus, PnlSnapshot, Result,
    Storage, TradingMode,
};
use gateway_client::BrokerApi;
use log::{debug, error, info, warn};
use pnl_engine::{AggregatedPnl, RealizedFigure, TargetCheck};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one P&L refresh.
#[derive(Debug, Clone, Serialize)]
pub struct PnlRefresh {
    pub instance_id: InstanceId,
    pub pnl: PnlSnapshot,
    /// Source of the realized figure and its divergence from the FIFO estimate.
    pub realized: RealizedFigure,
    pub open_positions: usize,
}

/// Result of a successful Safe-Switch.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub instance_id: InstanceId,
    pub mode: TradingMode,
    /// Failures of the close/cancel step. Informational only: the switch went
    /// ahead because the position book was verified flat afterwards.
    pub closure_errors: Vec<String>,
}

/// Owns the lifecycle of managed instances.
///
/// All remote work goes through the [`BrokerApi`] and all state through the
/// [`Storage`] collaborator; the manager itself holds no instance state.
pub struct InstanceManager {
    broker: Arc<dyn BrokerApi>,
    store: Arc<dyn Storage>,
}

impl InstanceManager {
    pub fn new(broker: Arc<dyn BrokerApi>, store: Arc<dyn Storage>) -> Self {
        Self { broker, store }
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    pub async fn instance(&self, id: InstanceId) -> Result<Instance> {
        self.store
            .get_instance(id)
            .await?
            .ok_or_else(|| FleetError::not_found("instance", id))
    }

    pub async fn list(&self, filter: InstanceFilter) -> Result<Vec<Instance>> {
        self.store.list_instances(filter).await
    }

    /// Pings the remote and only then stores the instance, marked healthy.
    pub async fn register(&self, new: NewInstance) -> Result<Instance> {
        if new.name.trim().is_empty() {
            return Err(FleetError::validation("instance name must not be empty"));
        }
        let url = new.endpoint.url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FleetError::validation(format!(
                "endpoint '{}' is not an http(s) URL",
                url
            )));
        }

        let info = self.broker.ping(&new.endpoint).await.map_err(|e| {
            warn!("Lifecycle: Connectivity check of {} failed: {}", url, e);
            e
        })?;

        let instance = self.store.insert_instance(new).await?;
        let mut update =
            InstanceUpdate::default().with_health(HealthSnapshot::checked_now(HealthStatus::Healthy));
        if let Some(broker) = info.broker {
            update = update.with_broker(broker);
        }
        let instance = self.store.update_instance(instance.id(), update).await?;
        info!(
            "Lifecycle: Registered {} at {} (broker: {})",
            instance.label(),
            instance.endpoint().url(),
            instance.broker().unwrap_or("unknown")
        );
        Ok(instance)
    }

    pub async fn delete(&self, id: InstanceId) -> Result<()> {
        self.store.delete_instance(id).await?;
        info!("Lifecycle: Deleted instance {}", id);
        Ok(())
    }

    /// Pings the instance and records the outcome. Never fails: a remote or
    /// storage failure ends up as `Unhealthy` (or in the log).
    pub async fn health_check(&self, instance: &Instance) -> HealthStatus {
        let endpoint = instance.endpoint();
        let mut update = InstanceUpdate::default();

        let status = match self.broker.ping(endpoint).await {
            Ok(info) => {
                if let Some(broker) = info.broker {
                    update = update.with_broker(broker);
                }
                match self.broker.analyzer_status(endpoint).await {
                    Ok(mode) => update = update.with_mode(mode),
                    Err(e) => debug!(
                        "Lifecycle: {} analyzer status unavailable: {}",
                        instance.label(),
                        e
                    ),
                }
                HealthStatus::Healthy
            }
            Err(e) => {
                warn!("Lifecycle: Health check of {} failed: {}", instance.label(), e);
                HealthStatus::Unhealthy
            }
        };

        update = update.with_health(HealthSnapshot::checked_now(status));
        if let Err(e) = self.store.update_instance(instance.id(), update).await {
            error!(
                "Lifecycle: Could not record health of {}: {}",
                instance.label(),
                e
            );
        }
        status
    }

    /// Fetches funds, trades and positions concurrently and stores the new
    /// P&L snapshot. All three fetches must succeed.
    pub async fn refresh_pnl(&self, instance: &Instance) -> Result<PnlRefresh> {
        let endpoint = instance.endpoint();
        let (funds, trades, positions) = tokio::try_join!(
            self.broker.funds(endpoint),
            self.broker.trades(endpoint),
            self.broker.positions(endpoint),
        )?;

        let estimate = pnl_engine::realized_pnl(&trades).total;
        let realized = pnl_engine::reconcile_realized(funds.realized(), estimate);
        if let Some(delta) = realized.divergence {
            warn!(
                "Lifecycle: {} realized P&L from funds ({:.2}) differs from trade book ({:.2}) by {:.2}",
                instance.label(),
                realized.value,
                estimate,
                delta
            );
        }

        let unrealized = pnl_engine::unrealized_pnl(&positions).total;
        let balance = funds.balance().unwrap_or_else(|| instance.pnl().balance());
        let pnl = PnlSnapshot::new(realized.value, unrealized, balance);

        self.store
            .update_instance(instance.id(), InstanceUpdate::default().with_pnl(pnl, Utc::now()))
            .await?;
        debug!(
            "Lifecycle: {} P&L realized {:.2} unrealized {:.2} total {:.2}",
            instance.label(),
            pnl.realized(),
            pnl.unrealized(),
            pnl.total()
        );

        Ok(PnlRefresh {
            instance_id: instance.id(),
            pnl,
            realized,
            open_positions: pnl_engine::open_positions(&positions).len(),
        })
    }

    /// Folds the remote order book into local non-terminal order records.
    /// Returns how many records changed.
    pub async fn sync_orders(&self, instance: &Instance) -> Result<usize> {
        let local = self.store.list_orders(instance.id()).await?;
        if local.iter().all(|o| o.status.is_terminal()) {
            return Ok(0);
        }

        let remote = self.broker.orders(instance.endpoint()).await?;
        let by_id: HashMap<&str, _> = remote.iter().map(|o| (o.order_id.as_str(), o)).collect();

        let mut updated = 0;
        for mut record in local.into_iter().filter(|o| !o.status.is_terminal()) {
            let Some(remote) = by_id.get(record.order_id.as_str()) else {
                continue;
            };
            if record.reconcile(remote) {
                debug!(
                    "Lifecycle: {} order {} is now {:?}",
                    instance.label(),
                    record.order_id,
                    record.status
                );
                self.store.upsert_order(record).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Safe-Switch.
    ///
    /// Going to analyzer mode first tries to square off and cancel everything
    /// under the instance's strategy tag, then re-reads the position book.
    /// The switch happens only if that book is flat, whatever the close step
    /// reported. Going live switches directly.
    pub async fn toggle_analyzer_mode(&self, id: InstanceId, to_analyzer: bool) -> Result<SwitchOutcome> {
        let instance = self.instance(id).await?;
        let endpoint = instance.endpoint();
        let strategy = instance.strategy_tag();
        let target = TradingMode::from_analyzer(to_analyzer);
        let mut closure_errors = Vec::new();

        if to_analyzer {
            info!(
                "Lifecycle: Safe-Switch of {} to analyzer: closing positions and orders",
                instance.label()
            );
            if let Err(e) = self.broker.close_all_positions(endpoint, strategy).await {
                warn!("Lifecycle: {} close positions failed: {}", instance.label(), e);
                closure_errors.push(format!("close positions: {}", e));
            }
            if let Err(e) = self.broker.cancel_all_orders(endpoint, strategy).await {
                warn!("Lifecycle: {} cancel orders failed: {}", instance.label(), e);
                closure_errors.push(format!("cancel orders: {}", e));
            }

            let positions = self.broker.positions(endpoint).await?;
            let open = pnl_engine::open_positions(&positions);
            if !open.is_empty() {
                let symbols: Vec<&str> = open.iter().map(|p| p.symbol()).collect();
                warn!(
                    "Lifecycle: Safe-Switch of {} refused, open positions: {:?}",
                    instance.label(),
                    symbols
                );
                return Err(FleetError::validation(format!(
                    "cannot switch {} to analyzer mode: {} open position(s) remain ({})",
                    instance.label(),
                    open.len(),
                    symbols.join(", ")
                )));
            }
        }

        let mode = self.broker.set_trading_mode(endpoint, target).await?;
        if mode != target {
            return Err(FleetError::validation(format!(
                "{} reported {} mode after switching to {}",
                instance.label(),
                mode,
                target
            )));
        }
        self.store
            .update_instance(id, InstanceUpdate::default().with_mode(mode))
            .await?;
        info!("Lifecycle: {} is now in {} mode", instance.label(), mode);

        Ok(SwitchOutcome {
            instance_id: id,
            mode,
            closure_errors,
        })
    }

    pub async fn place_order(&self, id: InstanceId, request: OrderRequest) -> Result<OrderRecord> {
        if request.quantity.is_nan() || request.quantity <= 0.0 {
            return Err(FleetError::validation("order quantity must be positive"));
        }
        if matches!(request.price, Some(price) if price <= 0.0) {
            return Err(FleetError::validation("limit price must be positive"));
        }
        let instance = self.instance(id).await?;

        let order_id = self
            .broker
            .place_order(instance.endpoint(), instance.strategy_tag(), &request)
            .await?;
        let record = OrderRecord::placed(id, order_id, &request);
        self.store.upsert_order(record.clone()).await?;
        info!(
            "Lifecycle: {} placed {} {} {} x{} -> {}",
            instance.label(),
            request.side,
            request.exchange,
            request.symbol,
            request.quantity,
            record.order_id
        );
        Ok(record)
    }

    pub async fn cancel_order(&self, id: InstanceId, order_id: &str) -> Result<()> {
        let instance = self.instance(id).await?;
        self.broker
            .cancel_order(instance.endpoint(), instance.strategy_tag(), order_id)
            .await?;

        let record = self
            .store
            .list_orders(id)
            .await?
            .into_iter()
            .find(|o| o.order_id == order_id);
        if let Some(mut record) = record {
            record.status = OrderStatus::Cancelled;
            record.updated_at = Utc::now();
            self.store.upsert_order(record).await?;
        }
        info!("Lifecycle: {} cancelled order {}", instance.label(), order_id);
        Ok(())
    }

    pub async fn orders(&self, id: InstanceId) -> Result<Vec<OrderRecord>> {
        self.instance(id).await?;
        self.store.list_orders(id).await
    }

    /// One batched quote request through `source`; every quote returned is
    /// upserted. Returns the number of quotes stored.
    pub async fn fetch_quotes(
        &self,
        source: &Instance,
        exchange: &str,
        symbols: &[String],
    ) -> Result<usize> {
        let quotes = self
            .broker
            .quotes(source.endpoint(), exchange, symbols)
            .await?;
        let count = quotes.len();
        for quote in quotes {
            self.store.upsert_quote(quote).await?;
        }
        if count < symbols.len() {
            debug!(
                "MarketData: {} priced {}/{} {} symbols",
                source.label(),
                count,
                symbols.len(),
                exchange
            );
        }
        Ok(count)
    }

    /// Refreshes every instance matching `filter` and rolls the results up.
    /// Failed instances are kept in the result with zero P&L.
    pub async fn aggregated_pnl(&self, filter: InstanceFilter) -> Result<AggregatedPnl> {
        let instances = self.store.list_instances(filter).await?;
        let refreshes =
            futures::future::join_all(instances.iter().map(|i| self.refresh_pnl(i))).await;

        let results = instances.iter().zip(refreshes).map(|(instance, refresh)| {
            let result = refresh.map(|r| r.pnl).map_err(|e| {
                warn!(
                    "Lifecycle: {} left out of aggregate P&L: {}",
                    instance.label(),
                    e
                );
                e.to_string()
            });
            (instance.id(), instance.name().to_string(), result)
        });
        Ok(pnl_engine::aggregate(results))
    }

    /// Compares the last stored P&L total with the instance's thresholds.
    pub async fn check_targets(&self, id: InstanceId) -> Result<TargetCheck> {
        let instance = self.instance(id).await?;
        Ok(pnl_engine::check_targets(
            &instance.targets(),
            instance.pnl().total(),
        ))
    }
}
