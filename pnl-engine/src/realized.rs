use crate::PnlBreakdown;
use fleet::model::market::QTY_EPSILON;
use fleet::{Side, Trade};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// Differences between the broker's realized figure and the FIFO estimate
/// up to this amount are rounding noise.
pub const DIVERGENCE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Lot {
    quantity: f64,
    price: f64,
}

/// Realized P&L per symbol.
///
/// Trades are ordered by timestamp (stable, so ties keep the remote order)
/// and grouped by symbol. A symbol whose trades all carry a remote P&L is
/// summed as reported; otherwise its trades are matched FIFO.
pub fn realized_pnl(trades: &[Trade]) -> PnlBreakdown {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by_key(|t| t.timestamp());

    let mut by_symbol: BTreeMap<&str, Vec<&Trade>> = BTreeMap::new();
    for trade in ordered {
        by_symbol.entry(trade.symbol()).or_default().push(trade);
    }

    let per_symbol = by_symbol
        .into_iter()
        .map(|(symbol, trades)| {
            let pnl = if trades.iter().all(|t| t.pnl().is_some()) {
                trades.iter().filter_map(|t| t.pnl()).sum::<f64>()
            } else {
                match_fifo(&trades)
            };
            (symbol.to_string(), pnl)
        })
        .collect();

    PnlBreakdown::from_symbols(per_symbol)
}

/// FIFO matching for one symbol. `trades` must already be in time order.
fn match_fifo(trades: &[&Trade]) -> f64 {
    let mut longs: VecDeque<Lot> = VecDeque::new();
    let mut shorts: VecDeque<Lot> = VecDeque::new();
    let mut realized = 0.0;

    for trade in trades {
        // A buy closes shorts (profit when it is cheaper), a sell closes longs.
        let (own, opposite, sign) = match trade.side() {
            Side::Buy => (&mut longs, &mut shorts, -1.0),
            Side::Sell => (&mut shorts, &mut longs, 1.0),
        };

        let mut remaining = trade.quantity();
        while remaining > QTY_EPSILON {
            let Some(lot) = opposite.front_mut() else {
                break;
            };
            let matched = remaining.min(lot.quantity);
            realized += sign * matched * (trade.price() - lot.price);
            lot.quantity -= matched;
            remaining -= matched;
            if lot.quantity <= QTY_EPSILON {
                opposite.pop_front();
            }
        }

        if remaining > QTY_EPSILON {
            own.push_back(Lot {
                quantity: remaining,
                price: trade.price(),
            });
        }
    }

    realized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RealizedSource {
    /// The funds endpoint reported a realized figure.
    Funds,
    /// No funds figure; FIFO over the trade book.
    Trades,
}

/// The realized figure to persist and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RealizedFigure {
    pub value: f64,
    pub source: RealizedSource,
    /// `authoritative - estimate`, when it exceeds [`DIVERGENCE_TOLERANCE`].
    pub divergence: Option<f64>,
}

/// Picks the broker's figure when present and reports how far the FIFO
/// estimate is from it.
pub fn reconcile_realized(authoritative: Option<f64>, estimate: f64) -> RealizedFigure {
    match authoritative {
        Some(value) => {
            let delta = value - estimate;
            RealizedFigure {
                value,
                source: RealizedSource::Funds,
                divergence: (delta.abs() > DIVERGENCE_TOLERANCE).then_some(delta),
            }
        }
        None => RealizedFigure {
            value: estimate,
            source: RealizedSource::Trades,
            divergence: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trade(symbol: &str, side: Side, quantity: f64, price: f64, at: i64) -> Trade {
        let timestamp = Utc.timestamp_opt(1_714_600_000 + at, 0).unwrap();
        Trade::new(symbol, side, quantity, price, timestamp)
    }

    fn assert_money(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    /// Verification Test: FIFO against weighted average
    ///
    /// **Objective**: Buys at increasing prices followed by sells of the same
    /// total quantity at one price realize `qty * (sell - weighted avg buy)`.
    #[test]
    fn test_fifo_matches_weighted_average_cost() {
        let cases: Vec<(Vec<(f64, f64)>, f64)> = vec![
            (vec![(10.0, 100.0), (10.0, 101.0), (10.0, 102.0)], 110.0),
            (vec![(5.0, 100.0), (15.0, 104.0)], 110.0),
            (vec![(1.0, 50.0), (2.0, 51.5), (3.0, 52.25), (4.0, 60.0)], 45.0),
        ];

        for (buys, sell_price) in cases {
            let mut trades = Vec::new();
            let mut at = 0;
            for (qty, price) in &buys {
                trades.push(trade("TCS", Side::Buy, *qty, *price, at));
                at += 1;
            }
            let total_qty: f64 = buys.iter().map(|(q, _)| q).sum();
            let weighted_avg = buys.iter().map(|(q, p)| q * p).sum::<f64>() / total_qty;
            // Sells split into two fills, to exercise partial lot consumption.
            trades.push(trade("TCS", Side::Sell, total_qty / 2.0, sell_price, at));
            trades.push(trade("TCS", Side::Sell, total_qty / 2.0, sell_price, at + 1));

            let pnl = realized_pnl(&trades);
            assert_money(pnl.total, total_qty * (sell_price - weighted_avg));
            assert_money(pnl.symbol("TCS"), pnl.total);
        }
    }

    #[test]
    fn test_realized_is_idempotent() {
        let trades = vec![
            trade("SBIN", Side::Buy, 10.0, 600.0, 0),
            trade("INFY", Side::Sell, 3.0, 1500.0, 1),
            trade("SBIN", Side::Sell, 4.0, 612.5, 2),
            trade("INFY", Side::Buy, 3.0, 1490.0, 3),
        ];
        assert_eq!(realized_pnl(&trades), realized_pnl(&trades));
    }

    #[test]
    fn test_short_lots_and_position_flip() {
        let trades = vec![
            trade("NIFTY", Side::Sell, 10.0, 200.0, 0),
            trade("NIFTY", Side::Buy, 4.0, 190.0, 1),
            trade("NIFTY", Side::Buy, 6.0, 195.0, 2),
            // Flat. Now long 10, then sell 15: flips to short 5 @ 110.
            trade("NIFTY", Side::Buy, 10.0, 100.0, 3),
            trade("NIFTY", Side::Sell, 15.0, 110.0, 4),
            trade("NIFTY", Side::Buy, 5.0, 105.0, 5),
        ];
        // 4*10 + 6*5 + 10*10 + 5*5
        assert_money(realized_pnl(&trades).total, 195.0);
    }

    #[test]
    fn test_trades_are_ordered_by_time_not_input_order() {
        let shuffled = vec![
            trade("SBIN", Side::Sell, 10.0, 110.0, 5),
            trade("SBIN", Side::Buy, 10.0, 120.0, 2),
            trade("SBIN", Side::Buy, 10.0, 100.0, 1),
        ];
        // Oldest lot (100) is consumed first.
        assert_money(realized_pnl(&shuffled).total, 100.0);
    }

    #[test]
    fn test_remote_pnl_trusted_only_when_complete() {
        let trades = vec![
            trade("A", Side::Buy, 1.0, 10.0, 0).with_pnl(0.0),
            trade("A", Side::Sell, 1.0, 12.0, 1).with_pnl(2.5),
            trade("B", Side::Buy, 1.0, 10.0, 0).with_pnl(0.0),
            trade("B", Side::Sell, 1.0, 12.0, 1),
        ];
        let pnl = realized_pnl(&trades);
        assert_money(pnl.symbol("A"), 2.5);
        assert_money(pnl.symbol("B"), 2.0);
        assert_money(pnl.total, 4.5);
    }

    #[test]
    fn test_reconcile_prefers_funds_and_reports_divergence() {
        let figure = reconcile_realized(Some(120.0), 100.0);
        assert_eq!(figure.source, RealizedSource::Funds);
        assert_eq!(figure.value, 120.0);
        assert_eq!(figure.divergence, Some(20.0));

        assert_eq!(reconcile_realized(Some(100.005), 100.0).divergence, None);

        let figure = reconcile_realized(None, 42.0);
        assert_eq!(figure.source, RealizedSource::Trades);
        assert_eq!(figure.value, 42.0);
    }

    #[test]
    fn test_empty_book_is_zero() {
        let pnl = realized_pnl(&[]);
        assert!(pnl.per_symbol.is_empty());
        assert_eq!(pnl.total, 0.0);
    }
}
