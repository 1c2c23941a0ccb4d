use crate::error::Result;
use crate::model::ids::{InstanceId, WatchlistId};
use crate::model::instance::{Instance, InstanceFilter, InstanceUpdate, NewInstance};
use crate::model::market::{Quote, Watchlist};
use crate::model::order::OrderRecord;
use async_trait::async_trait;

/// The persistence collaborator.
///
/// Implement this for an in-memory store, SQLite, Postgres, etc. Each call is
/// expected to be atomic on its own and to give read-your-writes consistency;
/// no multi-call transactions are assumed.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_instance(&self, id: InstanceId) -> Result<Option<Instance>>;

    async fn list_instances(&self, filter: InstanceFilter) -> Result<Vec<Instance>>;

    /// Assigns a fresh id and stores the instance.
    async fn insert_instance(&self, new: NewInstance) -> Result<Instance>;

    /// Applies a field-level patch and returns the updated row.
    /// Fails with `NotFound` for an unknown id.
    async fn update_instance(&self, id: InstanceId, update: InstanceUpdate) -> Result<Instance>;

    /// Removes the instance and cascades to its order records.
    /// Fails with `NotFound` for an unknown id.
    async fn delete_instance(&self, id: InstanceId) -> Result<()>;

    async fn list_orders(&self, instance: InstanceId) -> Result<Vec<OrderRecord>>;

    /// Inserts or replaces the record keyed by `(instance_id, order_id)`.
    async fn upsert_order(&self, order: OrderRecord) -> Result<()>;

    async fn get_watchlist(&self, id: WatchlistId) -> Result<Option<Watchlist>>;

    async fn save_watchlist(&self, watchlist: Watchlist) -> Result<()>;

    /// Inserts or replaces the quote keyed by `(exchange, symbol)`.
    async fn upsert_quote(&self, quote: Quote) -> Result<()>;

    async fn get_quote(&self, exchange: &str, symbol: &str) -> Result<Option<Quote>>;
}
