use super::persistence::{load_state, save_state};
use anyhow::Context;
use async_trait::async_trait;
use fleet::{
    FleetError, Instance, InstanceFilter, InstanceId, InstanceUpdate, NewInstance, OrderRecord,
    Quote, Result, Storage, Watchlist, WatchlistId,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    next_instance_id: u64,
    instances: BTreeMap<InstanceId, Instance>,
    orders: BTreeMap<(InstanceId, String), OrderRecord>,
    watchlists: BTreeMap<WatchlistId, Watchlist>,
    quotes: BTreeMap<(String, String), Quote>,
}

/// On-disk layout. Quotes are refreshed every few seconds and are not kept.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_instance_id: u64,
    instances: Vec<Instance>,
    orders: Vec<OrderRecord>,
    watchlists: Vec<Watchlist>,
}

impl Tables {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            next_instance_id: self.next_instance_id,
            instances: self.instances.values().cloned().collect(),
            orders: self.orders.values().cloned().collect(),
            watchlists: self.watchlists.values().cloned().collect(),
        }
    }

    fn restore(snapshot: Snapshot) -> Self {
        let mut tables = Tables {
            next_instance_id: snapshot.next_instance_id,
            ..Tables::default()
        };
        for instance in snapshot.instances {
            tables.next_instance_id = tables.next_instance_id.max(instance.id().value());
            tables.instances.insert(instance.id(), instance);
        }
        for order in snapshot.orders {
            tables
                .orders
                .insert((order.instance_id, order.order_id.clone()), order);
        }
        for watchlist in snapshot.watchlists {
            tables.watchlists.insert(watchlist.id, watchlist);
        }
        tables
    }
}

/// In-process [`Storage`] with optional JSON snapshots.
///
/// Every call takes the table lock once, so each call is atomic on its own.
/// When a snapshot path is set, mutating calls rewrite the snapshot before
/// returning.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Opens a store backed by `path`, restoring the previous snapshot if any.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let tables = match load_state::<Snapshot>(&path).context("Failed to restore store")? {
            Some(snapshot) => {
                info!(
                    "Store: Restored {} instance(s) from {}",
                    snapshot.instances.len(),
                    path.display()
                );
                Tables::restore(snapshot)
            }
            None => {
                info!("Store: No snapshot at {}, starting empty", path.display());
                Tables::default()
            }
        };
        Ok(Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| FleetError::storage("store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| FleetError::storage("store lock poisoned"))
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        // Snapshots are taken and written in lock order, so the file never
        // goes back to an older state.
        let _guard = self.persist_lock.lock().await;
        let snapshot = {
            let tables = self.read()?;
            tables.snapshot()
        };
        debug!("Store: Writing snapshot to {}", path.display());
        tokio::task::spawn_blocking(move || save_state(&path, &snapshot))
            .await
            .map_err(|e| FleetError::storage(format!("snapshot task failed: {}", e)))?
            .map_err(|e| FleetError::storage(format!("{:#}", e)))
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get_instance(&self, id: InstanceId) -> Result<Option<Instance>> {
        Ok(self.read()?.instances.get(&id).cloned())
    }

    async fn list_instances(&self, filter: InstanceFilter) -> Result<Vec<Instance>> {
        Ok(self
            .read()?
            .instances
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn insert_instance(&self, new: NewInstance) -> Result<Instance> {
        let instance = {
            let mut tables = self.write()?;
            tables.next_instance_id += 1;
            let instance = Instance::new(InstanceId::new(tables.next_instance_id), new);
            tables.instances.insert(instance.id(), instance.clone());
            instance
        };
        self.persist().await?;
        Ok(instance)
    }

    async fn update_instance(&self, id: InstanceId, update: InstanceUpdate) -> Result<Instance> {
        let instance = {
            let mut tables = self.write()?;
            let instance = tables
                .instances
                .get_mut(&id)
                .ok_or_else(|| FleetError::not_found("instance", id))?;
            instance.apply(&update);
            instance.clone()
        };
        self.persist().await?;
        Ok(instance)
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<()> {
        {
            let mut tables = self.write()?;
            if tables.instances.remove(&id).is_none() {
                return Err(FleetError::not_found("instance", id));
            }
            tables.orders.retain(|(owner, _), _| *owner != id);
        }
        self.persist().await
    }

    async fn list_orders(&self, instance: InstanceId) -> Result<Vec<OrderRecord>> {
        Ok(self
            .read()?
            .orders
            .values()
            .filter(|o| o.instance_id == instance)
            .cloned()
            .collect())
    }

    async fn upsert_order(&self, order: OrderRecord) -> Result<()> {
        {
            let mut tables = self.write()?;
            if !tables.instances.contains_key(&order.instance_id) {
                return Err(FleetError::not_found("instance", order.instance_id));
            }
            tables
                .orders
                .insert((order.instance_id, order.order_id.clone()), order);
        }
        self.persist().await
    }

    async fn get_watchlist(&self, id: WatchlistId) -> Result<Option<Watchlist>> {
        Ok(self.read()?.watchlists.get(&id).cloned())
    }

    async fn save_watchlist(&self, watchlist: Watchlist) -> Result<()> {
        self.write()?.watchlists.insert(watchlist.id, watchlist);
        self.persist().await
    }

    async fn upsert_quote(&self, quote: Quote) -> Result<()> {
        let key = (quote.exchange.clone(), quote.symbol.clone());
        self.write()?.quotes.insert(key, quote);
        Ok(())
    }

    async fn get_quote(&self, exchange: &str, symbol: &str) -> Result<Option<Quote>> {
        Ok(self
            .read()?
            .quotes
            .get(&(exchange.to_string(), symbol.to_string()))
            .cloned())
    }
}
