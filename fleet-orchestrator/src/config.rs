use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use gateway_client::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide tunables.
///
/// Layered as: built-in defaults, then the optional TOML file, then
/// `FLEET_*` environment variables (e.g. `FLEET_MAX_RETRIES=5`).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    // Gateway client
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,

    // Scheduler
    pub instance_poll_secs: u64,
    pub health_poll_secs: u64,
    pub market_data_poll_secs: u64,

    pub server_port: u16,
    /// Where the in-memory store snapshots itself. `None` keeps state in memory only.
    pub state_file: Option<PathBuf>,
    /// Start the instance and health loops at boot.
    pub autostart: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,

            instance_poll_secs: 15,
            health_poll_secs: 300,
            market_data_poll_secs: 5,

            server_port: 3000,
            state_file: None,
            autostart: true,
        }
    }
}

/// Periods of the scheduler loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub instance: Duration,
    pub health: Duration,
    pub market_data: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        FleetConfig::default().intervals()
    }
}

impl FleetConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("FLEET")
                .try_parsing(true)
                .ignore_empty(true),
        );

        let config: FleetConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.request_timeout_ms > 0, "request_timeout_ms must be positive");
        ensure!(self.instance_poll_secs > 0, "instance_poll_secs must be positive");
        ensure!(self.health_poll_secs > 0, "health_poll_secs must be positive");
        ensure!(
            self.market_data_poll_secs > 0,
            "market_data_poll_secs must be positive"
        );
        Ok(())
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn intervals(&self) -> Intervals {
        Intervals {
            instance: Duration::from_secs(self.instance_poll_secs),
            health: Duration::from_secs(self.health_poll_secs),
            market_data: Duration::from_secs(self.market_data_poll_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_gateway_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.gateway(), GatewayConfig::default());
        assert_eq!(config.intervals().health, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("fleet-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fleet.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "max_retries = 5").unwrap();
        writeln!(file, "instance_poll_secs = 30").unwrap();
        writeln!(file, "state_file = \"/var/lib/fleet/state.json\"").unwrap();
        drop(file);

        let config = FleetConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.intervals().instance, Duration::from_secs(30));
        assert_eq!(config.retry_base_delay_ms, 1_000);
        assert_eq!(
            config.state_file,
            Some(PathBuf::from("/var/lib/fleet/state.json"))
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = FleetConfig {
            market_data_poll_secs: 0,
            ..FleetConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
