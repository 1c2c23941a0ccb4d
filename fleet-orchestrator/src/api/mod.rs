//! API module
//!
//! Thin JSON control surface over the instance manager and the scheduler.
//! Every reply carries `"status": "OK"` or `"status": "ERROR"` with a `msg`.

pub mod error;

use crate::lifecycle::InstanceManager;
use crate::scheduler::Scheduler;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use error::ApiError;
use fleet::{
    FleetError, HealthSnapshot, Instance, InstanceFilter, InstanceId, MarketDataRole, NewInstance,
    OrderRequest, PnlSnapshot, RiskTargets, TradingMode, Watchlist, WatchlistId,
};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

type ApiResult = Result<Json<Value>, ApiError>;

// App State to share with routes
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<InstanceManager>,
    pub scheduler: Arc<Scheduler>,
}

/// Outward view of an instance; the API key only ever leaves masked.
#[derive(Debug, Serialize)]
pub struct InstanceView {
    pub id: InstanceId,
    pub name: String,
    pub url: String,
    pub api_key: String,
    pub strategy_tag: String,
    pub active: bool,
    pub mode: TradingMode,
    pub market_data_role: MarketDataRole,
    pub targets: RiskTargets,
    pub pnl: PnlSnapshot,
    pub last_pnl_update: Option<DateTime<Utc>>,
    pub health: HealthSnapshot,
    pub broker: Option<String>,
}

impl From<&Instance> for InstanceView {
    fn from(instance: &Instance) -> Self {
        Self {
            id: instance.id(),
            name: instance.name().to_string(),
            url: instance.endpoint().url().to_string(),
            api_key: instance.endpoint().api_key().masked(),
            strategy_tag: instance.strategy_tag().to_string(),
            active: instance.is_active(),
            mode: instance.mode(),
            market_data_role: instance.market_data_role(),
            targets: instance.targets(),
            pnl: instance.pnl(),
            last_pnl_update: instance.last_pnl_update(),
            health: instance.health(),
            broker: instance.broker().map(str::to_string),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    #[serde(default)]
    pub active: bool,
}

impl FilterQuery {
    fn filter(&self) -> InstanceFilter {
        if self.active {
            InstanceFilter::Active
        } else {
            InstanceFilter::All
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzerRequest {
    pub analyzer: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/market-data/:watchlist/start", post(start_market_data))
        .route("/market-data/stop", post(stop_market_data))
        .route("/instances", get(list_instances).post(register_instance))
        .route("/instances/:id", delete(delete_instance))
        .route("/instances/:id/refresh", post(refresh_instance))
        .route("/instances/:id/analyzer", post(set_analyzer_mode))
        .route("/instances/:id/targets", get(get_targets))
        .route("/instances/:id/orders", get(list_orders).post(place_order))
        .route("/instances/:id/orders/:order_id", delete(cancel_order))
        .route("/pnl", get(get_pnl))
        .route("/watchlists", post(save_watchlist))
        .route("/quotes/:exchange/:symbol", get(get_quote))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves `app` on `0.0.0.0:port` until `shutdown` resolves.
pub async fn serve(
    app: Router,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API: Listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "OK", "scheduler": state.scheduler.status()}))
}

async fn start_scheduler(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.start();
    Json(json!({"status": "OK", "msg": "Scheduler started"}))
}

async fn stop_scheduler(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.stop();
    Json(json!({"status": "OK", "msg": "Scheduler stopped"}))
}

async fn start_market_data(
    State(state): State<AppState>,
    Path(watchlist): Path<u64>,
) -> ApiResult {
    let watchlist = WatchlistId::new(watchlist);
    state.scheduler.start_market_data(watchlist).await?;
    Ok(Json(json!({
        "status": "OK",
        "msg": format!("Market data polling watchlist {}", watchlist)
    })))
}

async fn stop_market_data(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.stop_market_data();
    Json(json!({"status": "OK", "msg": "Market data stopped"}))
}

// Instance handlers
async fn list_instances(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> ApiResult {
    let instances = state.manager.list(query.filter()).await?;
    let views: Vec<InstanceView> = instances.iter().map(InstanceView::from).collect();
    Ok(Json(json!({"status": "OK", "instances": views})))
}

async fn register_instance(
    State(state): State<AppState>,
    Json(new): Json<NewInstance>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let instance = state.manager.register(new).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"status": "OK", "instance": InstanceView::from(&instance)})),
    ))
}

async fn delete_instance(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult {
    state.manager.delete(InstanceId::new(id)).await?;
    Ok(Json(json!({"status": "OK", "msg": "Instance deleted"})))
}

async fn refresh_instance(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult {
    let report = state.scheduler.refresh_instance(InstanceId::new(id)).await?;
    Ok(Json(json!({"status": "OK", "refresh": report})))
}

async fn set_analyzer_mode(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AnalyzerRequest>,
) -> ApiResult {
    let outcome = state
        .manager
        .toggle_analyzer_mode(InstanceId::new(id), request.analyzer)
        .await?;
    Ok(Json(json!({"status": "OK", "switch": outcome})))
}

async fn get_targets(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult {
    let check = state.manager.check_targets(InstanceId::new(id)).await?;
    Ok(Json(json!({"status": "OK", "targets": check})))
}

// Order handlers
async fn list_orders(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult {
    let orders = state.manager.orders(InstanceId::new(id)).await?;
    Ok(Json(json!({"status": "OK", "orders": orders})))
}

async fn place_order(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let order = state.manager.place_order(InstanceId::new(id), request).await?;
    Ok((StatusCode::CREATED, Json(json!({"status": "OK", "order": order}))))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path((id, order_id)): Path<(u64, String)>,
) -> ApiResult {
    state.manager.cancel_order(InstanceId::new(id), &order_id).await?;
    Ok(Json(json!({"status": "OK", "msg": "Order cancelled"})))
}

async fn get_pnl(State(state): State<AppState>, Query(query): Query<FilterQuery>) -> ApiResult {
    let pnl = state.manager.aggregated_pnl(query.filter()).await?;
    Ok(Json(json!({"status": "OK", "pnl": pnl})))
}

// Market data handlers
async fn save_watchlist(
    State(state): State<AppState>,
    Json(watchlist): Json<Watchlist>,
) -> ApiResult {
    if watchlist.name.trim().is_empty() {
        return Err(FleetError::validation("watchlist name must not be empty").into());
    }
    let id = watchlist.id;
    state.manager.store().save_watchlist(watchlist).await?;
    Ok(Json(json!({"status": "OK", "msg": format!("Watchlist {} saved", id)})))
}

async fn get_quote(
    State(state): State<AppState>,
    Path((exchange, symbol)): Path<(String, String)>,
) -> ApiResult {
    let exchange = exchange.to_uppercase();
    let quote = state
        .manager
        .store()
        .get_quote(&exchange, &symbol)
        .await?
        .ok_or_else(|| FleetError::not_found("quote", format!("{}:{}", exchange, symbol)))?;
    Ok(Json(json!({"status": "OK", "quote": quote})))
}
