use fleet::{InstanceId, PnlSnapshot};
use serde::Serialize;

/// One instance's contribution to the fleet total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstancePnl {
    pub instance_id: InstanceId,
    pub name: String,
    pub pnl: PnlSnapshot,
    /// Set when the figures could not be fetched; `pnl` is zero then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedPnl {
    pub instances: Vec<InstancePnl>,
    pub realized: f64,
    pub unrealized: f64,
    pub total: f64,
    pub balance: f64,
    pub failed: usize,
}

/// All-settled roll-up: failed instances stay in the list with zero P&L and
/// their error, and never abort the aggregation.
pub fn aggregate<I>(results: I) -> AggregatedPnl
where
    I: IntoIterator<Item = (InstanceId, String, Result<PnlSnapshot, String>)>,
{
    let mut out = AggregatedPnl::default();
    for (instance_id, name, result) in results {
        let (pnl, error) = match result {
            Ok(pnl) => (pnl, None),
            Err(e) => {
                out.failed += 1;
                (PnlSnapshot::default(), Some(e))
            }
        };
        out.realized += pnl.realized();
        out.unrealized += pnl.unrealized();
        out.total += pnl.total();
        out.balance += pnl.balance();
        out.instances.push(InstancePnl {
            instance_id,
            name,
            pnl,
            error,
        });
    }
    out
}
