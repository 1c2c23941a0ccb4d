//! # Fleet API
//!
//! Shared vocabulary for managing a fleet of remote broker-gateway instances.
//!
//! ## Modules
//! - `model`: Instances, trades, positions, orders and quotes as seen by the orchestrator.
//! - `error`: The error taxonomy shared by the gateway client, the lifecycle manager and the scheduler.
//! - `traits`: Seams to external collaborators (storage).

pub mod error;
pub mod model;
pub mod traits;

pub use error::{FleetError, RemoteError, RemoteErrorKind, Result};
pub use model::account::{number, Funds, PingInfo};
pub use model::ids::{InstanceId, WatchlistId};
pub use model::instance::{
    Credential, Endpoint, HealthSnapshot, HealthStatus, Instance, InstanceFilter, InstanceUpdate,
    MarketDataRole, NewInstance, PnlSnapshot, RiskTargets, TradingMode,
};
pub use model::market::{Position, Quote, Side, Trade, Watchlist, WatchlistSymbol};
pub use model::order::{OrderRecord, OrderRequest, OrderStatus, RemoteOrder};
pub use traits::storage::Storage;
