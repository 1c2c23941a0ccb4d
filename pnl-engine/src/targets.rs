use fleet::RiskTargets;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Profit,
    Loss,
    None,
}

/// Outcome of comparing a P&L total against an instance's thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetCheck {
    pub hit: bool,
    pub kind: TargetKind,
    /// The threshold that was hit, as configured.
    pub threshold: Option<f64>,
}

impl TargetCheck {
    fn hit(kind: TargetKind, threshold: f64) -> Self {
        Self {
            hit: true,
            kind,
            threshold: Some(threshold),
        }
    }

    fn miss() -> Self {
        Self {
            hit: false,
            kind: TargetKind::None,
            threshold: None,
        }
    }
}

/// Profit is hit at `total >= target_profit`, loss at
/// `total <= -|target_loss|`. Profit is checked first. Unset thresholds are
/// never hit.
pub fn check_targets(targets: &RiskTargets, total: f64) -> TargetCheck {
    if let Some(profit) = targets.target_profit {
        if total >= profit {
            return TargetCheck::hit(TargetKind::Profit, profit);
        }
    }
    if let Some(loss) = targets.target_loss {
        if total <= -loss.abs() {
            return TargetCheck::hit(TargetKind::Loss, loss);
        }
    }
    TargetCheck::miss()
}
