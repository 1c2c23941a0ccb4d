pub mod manager;

#[cfg(test)]
pub(crate) mod mock;

pub use manager::{InstanceManager, PnlRefresh, SwitchOutcome};
