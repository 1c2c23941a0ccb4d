//! # P&L Engine
//!
//! Profit and loss arithmetic over remote trade and position books.
//! Everything here is a pure function: no I/O, no shared state.
//!
//! ## Modules
//! - `realized`: FIFO lot matching and reconciliation with the broker's own figure.
//! - `unrealized`: Open-position filtering and mark-to-market sums.
//! - `targets`: Profit/loss threshold checks.
//! - `aggregate`: All-settled roll-up across instances.

pub mod aggregate;
pub mod realized;
pub mod targets;
pub mod unrealized;

use serde::Serialize;
use std::collections::BTreeMap;

pub use aggregate::{aggregate, AggregatedPnl, InstancePnl};
pub use realized::{
    realized_pnl, reconcile_realized, RealizedFigure, RealizedSource, DIVERGENCE_TOLERANCE,
};
pub use targets::{check_targets, TargetCheck, TargetKind};
pub use unrealized::{open_positions, unrealized_pnl};

/// P&L per symbol plus the sum over all symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PnlBreakdown {
    pub per_symbol: BTreeMap<String, f64>,
    pub total: f64,
}

impl PnlBreakdown {
    pub(crate) fn from_symbols(per_symbol: BTreeMap<String, f64>) -> Self {
        let total = per_symbol.values().sum();
        Self { per_symbol, total }
    }

    pub fn symbol(&self, symbol: &str) -> f64 {
        self.per_symbol.get(symbol).copied().unwrap_or(0.0)
    }
}
