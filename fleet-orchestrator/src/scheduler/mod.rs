//! Periodic drivers of the fleet.
//!
//! Three loops, each a tokio task with its own interval and stop signal:
//! - instance loop: P&L refresh and order sync of every active instance,
//! - health loop: health check of every instance,
//! - market-data loop: quotes for one watchlist, only while it is started.
//!
//! Every cycle fans out one task per unit of work on a `JoinSet`, so a slow,
//! failing or panicking instance only counts as a failure for itself.

pub mod market_data;

use crate::config::Intervals;
use crate::lifecycle::{InstanceManager, PnlRefresh};
use chrono::{DateTime, Utc};
use fleet::{FleetError, HealthStatus, Instance, InstanceFilter, InstanceId, WatchlistId};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

const MIN_PERIOD: Duration = Duration::from_millis(10);

type Outcome = std::result::Result<(), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    Instances,
    Health,
    MarketData,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopKind::Instances => write!(f, "instance"),
            LoopKind::Health => write!(f, "health"),
            LoopKind::MarketData => write!(f, "market-data"),
        }
    }
}

/// Counters of one scheduler tick. Kept in memory for `status()` only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollCycleResult {
    pub kind: LoopKind,
    /// Watchlist a market-data cycle polled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchlist: Option<WatchlistId>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub running: bool,
    pub interval_secs: f64,
    pub last_cycle: Option<PollCycleResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketDataStatus {
    #[serde(flatten)]
    pub state: LoopStatus,
    pub watchlist: Option<WatchlistId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub instances: LoopStatus,
    pub health: LoopStatus,
    pub market_data: MarketDataStatus,
}

/// Outcome of a manual refresh of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub instance_id: InstanceId,
    pub health: HealthStatus,
    pub pnl: PnlRefresh,
    pub orders_updated: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    attempted: usize,
    succeeded: usize,
    failed: usize,
}

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Lets the current cycle finish; no further tick starts. The returned
    /// task ends once that cycle is done.
    fn stop(self) -> JoinHandle<()> {
        let _ = self.stop.send(true);
        self.task
    }
}

#[derive(Default)]
struct Loops {
    instances: Option<LoopHandle>,
    health: Option<LoopHandle>,
    market_data: Option<(WatchlistId, LoopHandle)>,
    /// Stopped loops whose last cycle may still be in flight. A loop of the
    /// same kind started meanwhile waits for it before its first tick.
    stopping: HashMap<LoopKind, JoinHandle<()>>,
}

impl Loops {
    fn retire(&mut self, kind: LoopKind, handle: LoopHandle) {
        self.stopping.insert(kind, handle.stop());
    }

    fn draining(&mut self, kind: LoopKind) -> Option<JoinHandle<()>> {
        self.stopping.remove(&kind).filter(|task| !task.is_finished())
    }
}

fn running(handle: Option<&LoopHandle>) -> bool {
    handle.map(LoopHandle::is_running).unwrap_or(false)
}

/// Process-wide periodic driver. Owned by the composition root and shared
/// behind an `Arc`; loops hold their own clone of it.
pub struct Scheduler {
    manager: Arc<InstanceManager>,
    intervals: Intervals,
    loops: Mutex<Loops>,
    last_cycles: Mutex<HashMap<LoopKind, PollCycleResult>>,
}

impl Scheduler {
    pub fn new(manager: Arc<InstanceManager>, intervals: Intervals) -> Self {
        Self {
            manager,
            intervals,
            loops: Mutex::new(Loops::default()),
            last_cycles: Mutex::new(HashMap::new()),
        }
    }

    fn loops(&self) -> MutexGuard<'_, Loops> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_cycles(&self) -> MutexGuard<'_, HashMap<LoopKind, PollCycleResult>> {
        self.last_cycles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the instance and health loops. Loops already running are left alone.
    pub fn start(self: &Arc<Self>) {
        let mut loops = self.loops();

        if running(loops.instances.as_ref()) {
            debug!("Scheduler: Instance loop already running");
        } else {
            info!("Scheduler: Starting instance loop every {:?}", self.intervals.instance);
            let previous = loops.draining(LoopKind::Instances);
            loops.instances = Some(self.spawn_loop(LoopKind::Instances, self.intervals.instance, previous, |s| async move {
                s.poll_instances().await;
            }));
        }

        if running(loops.health.as_ref()) {
            debug!("Scheduler: Health loop already running");
        } else {
            info!("Scheduler: Starting health loop every {:?}", self.intervals.health);
            let previous = loops.draining(LoopKind::Health);
            loops.health = Some(self.spawn_loop(LoopKind::Health, self.intervals.health, previous, |s| async move {
                s.poll_health_checks().await;
            }));
        }
    }

    /// Stops the instance and health loops. Idempotent.
    pub fn stop(&self) {
        let mut loops = self.loops();
        let stopped = [
            (LoopKind::Instances, loops.instances.take()),
            (LoopKind::Health, loops.health.take()),
        ];
        for (kind, handle) in stopped {
            if let Some(handle) = handle {
                info!("Scheduler: Stopping {} loop", kind);
                loops.retire(kind, handle);
            }
        }
    }

    /// Starts quote polling for `watchlist`, replacing any other watchlist.
    /// Starting the watchlist that is already being polled is a no-op.
    pub async fn start_market_data(self: &Arc<Self>, watchlist: WatchlistId) -> fleet::Result<()> {
        if self.manager.store().get_watchlist(watchlist).await?.is_none() {
            return Err(FleetError::not_found("watchlist", watchlist));
        }

        let mut loops = self.loops();
        if let Some((current, handle)) = &loops.market_data {
            if *current == watchlist && handle.is_running() {
                debug!("MarketData: Watchlist {} already polling", watchlist);
                return Ok(());
            }
        }
        if let Some((previous, handle)) = loops.market_data.take() {
            info!("MarketData: Stopping watchlist {}", previous);
            loops.retire(LoopKind::MarketData, handle);
        }
        self.last_cycles().remove(&LoopKind::MarketData);

        info!(
            "MarketData: Polling watchlist {} every {:?}",
            watchlist, self.intervals.market_data
        );
        let previous = loops.draining(LoopKind::MarketData);
        let handle = self.spawn_loop(LoopKind::MarketData, self.intervals.market_data, previous, move |s| async move {
            if let Err(e) = s.poll_market_data(watchlist).await {
                warn!("MarketData: Cycle for watchlist {} failed: {}", watchlist, e);
            }
        });
        loops.market_data = Some((watchlist, handle));
        Ok(())
    }

    /// Idempotent.
    pub fn stop_market_data(&self) {
        let mut loops = self.loops();
        if let Some((watchlist, handle)) = loops.market_data.take() {
            info!("MarketData: Stopping watchlist {}", watchlist);
            loops.retire(LoopKind::MarketData, handle);
            self.last_cycles().remove(&LoopKind::MarketData);
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let loops = self.loops();
        let last = self.last_cycles();
        let watchlist = loops.market_data.as_ref().map(|(w, _)| *w);
        let state = |handle: Option<&LoopHandle>, interval: Duration, kind: LoopKind| LoopStatus {
            running: running(handle),
            interval_secs: interval.as_secs_f64(),
            // A late cycle of a replaced watchlist is not reported.
            last_cycle: last
                .get(&kind)
                .filter(|c| kind != LoopKind::MarketData || (watchlist.is_some() && c.watchlist == watchlist))
                .cloned(),
        };

        SchedulerStatus {
            instances: state(loops.instances.as_ref(), self.intervals.instance, LoopKind::Instances),
            health: state(loops.health.as_ref(), self.intervals.health, LoopKind::Health),
            market_data: MarketDataStatus {
                state: state(
                    loops.market_data.as_ref().map(|(_, h)| h),
                    self.intervals.market_data,
                    LoopKind::MarketData,
                ),
                watchlist,
            },
        }
    }

    fn spawn_loop<F, Fut>(
        self: &Arc<Self>,
        kind: LoopKind,
        period: Duration,
        previous: Option<JoinHandle<()>>,
        cycle: F,
    ) -> LoopHandle
    where
        F: Fn(Arc<Scheduler>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                debug!("Scheduler: {} loop waits for the stopped one to finish its cycle", kind);
                let _ = previous.await;
            }
            let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => cycle(Arc::clone(&this)).await,
                }
            }
            debug!("Scheduler: {} loop exited", kind);
        });
        LoopHandle { stop, task }
    }

    fn finish(
        &self,
        kind: LoopKind,
        watchlist: Option<WatchlistId>,
        started: Instant,
        tally: Tally,
    ) -> PollCycleResult {
        let result = PollCycleResult {
            kind,
            watchlist,
            attempted: tally.attempted,
            succeeded: tally.succeeded,
            failed: tally.failed,
            duration_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        };
        if result.failed > 0 {
            warn!(
                "Scheduler: {} cycle {}/{} ok, {} failed in {}ms",
                kind, result.succeeded, result.attempted, result.failed, result.duration_ms
            );
        } else {
            info!(
                "Scheduler: {} cycle {}/{} ok in {}ms",
                kind, result.succeeded, result.attempted, result.duration_ms
            );
        }
        self.last_cycles().insert(kind, result.clone());
        result
    }

    /// One tick of the instance loop over every active instance.
    pub async fn poll_instances(&self) -> PollCycleResult {
        let started = Instant::now();
        let instances = match self.manager.list(InstanceFilter::Active).await {
            Ok(instances) => instances,
            Err(e) => {
                error!("Scheduler: Could not list active instances: {}", e);
                return self.finish(LoopKind::Instances, None, started, Tally::default());
            }
        };

        let mut tasks = JoinSet::new();
        for instance in instances {
            let manager = Arc::clone(&self.manager);
            tasks.spawn(async move {
                let outcome = poll_instance(&manager, &instance)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string());
                (instance.label(), outcome)
            });
        }
        let tally = settle(LoopKind::Instances, &mut tasks).await;
        self.finish(LoopKind::Instances, None, started, tally)
    }

    /// One tick of the health loop over every instance, active or not.
    /// A check that records `Unhealthy` counts as failed.
    pub async fn poll_health_checks(&self) -> PollCycleResult {
        let started = Instant::now();
        let instances = match self.manager.list(InstanceFilter::All).await {
            Ok(instances) => instances,
            Err(e) => {
                error!("Scheduler: Could not list instances: {}", e);
                return self.finish(LoopKind::Health, None, started, Tally::default());
            }
        };

        let mut tasks = JoinSet::new();
        for instance in instances {
            let manager = Arc::clone(&self.manager);
            tasks.spawn(async move {
                let outcome = match manager.health_check(&instance).await {
                    HealthStatus::Healthy => Ok(()),
                    other => Err(format!("recorded {:?}", other)),
                };
                (instance.label(), outcome)
            });
        }
        let tally = settle(LoopKind::Health, &mut tasks).await;
        self.finish(LoopKind::Health, None, started, tally)
    }

    /// One tick of the market-data loop: a batched quote request per exchange
    /// of the watchlist through the selected market-data instance.
    pub async fn poll_market_data(&self, watchlist: WatchlistId) -> fleet::Result<PollCycleResult> {
        let started = Instant::now();
        let watchlist = self
            .manager
            .store()
            .get_watchlist(watchlist)
            .await?
            .ok_or_else(|| FleetError::not_found("watchlist", watchlist))?;

        let groups = market_data::group_by_exchange(&watchlist);
        if groups.is_empty() {
            return Ok(self.finish(LoopKind::MarketData, Some(watchlist.id), started, Tally::default()));
        }

        let candidates = self.manager.list(InstanceFilter::Active).await?;
        let Some(source) = market_data::select_source(&candidates) else {
            warn!(
                "MarketData: No active primary/secondary instance for watchlist '{}'",
                watchlist.name
            );
            let tally = Tally {
                attempted: groups.len(),
                succeeded: 0,
                failed: groups.len(),
            };
            return Ok(self.finish(LoopKind::MarketData, Some(watchlist.id), started, tally));
        };
        debug!(
            "MarketData: Watchlist '{}' via {}",
            watchlist.name,
            source.label()
        );

        let source = Arc::new(source.clone());
        let mut tasks = JoinSet::new();
        for (exchange, symbols) in groups {
            let manager = Arc::clone(&self.manager);
            let source = Arc::clone(&source);
            tasks.spawn(async move {
                let outcome = manager
                    .fetch_quotes(&source, &exchange, &symbols)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string());
                (exchange, outcome)
            });
        }
        let tally = settle(LoopKind::MarketData, &mut tasks).await;
        Ok(self.finish(LoopKind::MarketData, Some(watchlist.id), started, tally))
    }

    /// Health check, P&L refresh and order sync of one instance, now.
    /// Same operations as the scheduled loops; failures go to the caller.
    pub async fn refresh_instance(&self, id: InstanceId) -> fleet::Result<RefreshReport> {
        let instance = self.manager.instance(id).await?;
        let health = self.manager.health_check(&instance).await;
        let (pnl, orders_updated) = poll_instance(&self.manager, &instance).await?;
        info!(
            "Scheduler: Manual refresh of {} done ({:?}, total P&L {:.2})",
            instance.label(),
            health,
            pnl.pnl.total()
        );
        Ok(RefreshReport {
            instance_id: id,
            health,
            pnl,
            orders_updated,
        })
    }
}

/// The per-instance work of the instance loop: P&L refresh and order sync
/// side by side, then the target check.
async fn poll_instance(
    manager: &InstanceManager,
    instance: &Instance,
) -> fleet::Result<(PnlRefresh, usize)> {
    let (pnl, orders) = tokio::join!(manager.refresh_pnl(instance), manager.sync_orders(instance));
    let pnl = pnl?;
    let orders = orders?;

    let check = pnl_engine::check_targets(&instance.targets(), pnl.pnl.total());
    if check.hit {
        warn!(
            "Scheduler: {} hit its {:?} target {:?} (total P&L {:.2})",
            instance.label(),
            check.kind,
            check.threshold,
            pnl.pnl.total()
        );
    }
    Ok((pnl, orders))
}

async fn settle(kind: LoopKind, tasks: &mut JoinSet<(String, Outcome)>) -> Tally {
    let mut tally = Tally::default();
    while let Some(joined) = tasks.join_next().await {
        tally.attempted += 1;
        match joined {
            Ok((_, Ok(()))) => tally.succeeded += 1,
            Ok((unit, Err(e))) => {
                tally.failed += 1;
                debug!("Scheduler: {} work for {} failed: {}", kind, unit, e);
            }
            Err(e) => {
                tally.failed += 1;
                error!("Scheduler: {} task died: {}", kind, e);
            }
        }
    }
    tally
}
