use fleet::{HealthStatus, Instance, MarketDataRole, Watchlist};
use std::collections::BTreeMap;

fn role_rank(role: MarketDataRole) -> u8 {
    match role {
        MarketDataRole::Primary => 0,
        MarketDataRole::Secondary => 1,
        MarketDataRole::None => 2,
    }
}

/// The instance quotes are fetched through: an active instance with a
/// market-data role, primary before secondary, healthy before not, lowest
/// id as the tie-break.
pub fn select_source(instances: &[Instance]) -> Option<&Instance> {
    instances
        .iter()
        .filter(|i| i.is_active() && i.market_data_role() != MarketDataRole::None)
        .min_by_key(|i| {
            (
                role_rank(i.market_data_role()),
                i.health().status != HealthStatus::Healthy,
                i.id(),
            )
        })
}

/// Enabled symbols of `watchlist` grouped by exchange, without duplicates.
pub fn group_by_exchange(watchlist: &Watchlist) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in watchlist.symbols.iter().filter(|s| s.enabled) {
        let symbols = groups.entry(entry.exchange.to_uppercase()).or_default();
        if !symbols.contains(&entry.symbol) {
            symbols.push(entry.symbol.clone());
        }
    }
    groups
}
