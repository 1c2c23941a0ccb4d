use crate::PnlBreakdown;
use fleet::Position;
use std::collections::BTreeMap;

/// Positions with a non-zero net quantity.
pub fn open_positions(positions: &[Position]) -> Vec<&Position> {
    positions.iter().filter(|p| p.is_open()).collect()
}

/// Sum of the remote-reported P&L of open positions, per symbol.
///
/// Flat positions are skipped even when the remote still reports a P&L for
/// them; that amount is already part of the realized figure.
pub fn unrealized_pnl(positions: &[Position]) -> PnlBreakdown {
    let mut per_symbol: BTreeMap<String, f64> = BTreeMap::new();
    for position in open_positions(positions) {
        *per_symbol.entry(position.symbol().to_string()).or_default() += position.pnl();
    }
    PnlBreakdown::from_symbols(per_symbol)
}
