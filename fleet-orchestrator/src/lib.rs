//! # Fleet Orchestrator
//!
//! Supervises a fleet of remote broker-gateway instances.
//!
//! ## Modules
//! - `lifecycle`: [`InstanceManager`](lifecycle::InstanceManager): registration, health, P&L refresh, Safe-Switch.
//! - `scheduler`: the periodic instance, health and market-data loops.
//! - `store`: in-memory [`fleet::Storage`] with optional JSON snapshots.
//! - `api`: the HTTP control surface.
//! - `config` / `args`: layered configuration and command-line overrides.

pub mod api;
pub mod args;
pub mod config;
pub mod lifecycle;
pub mod scheduler;
pub mod store;
