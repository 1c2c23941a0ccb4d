use anyhow::Context;
use clap::Parser;
use fleet::Storage;
use fleet_orchestrator::api::{self, AppState};
use fleet_orchestrator::args::Args;
use fleet_orchestrator::config::FleetConfig;
use fleet_orchestrator::lifecycle::InstanceManager;
use fleet_orchestrator::scheduler::Scheduler;
use fleet_orchestrator::store::MemoryStore;
use gateway_client::{GatewayClient, ReqwestTransport};
use log::{info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    info!("=== Fleet Orchestrator Starting ===");

    let mut config = FleetConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(path) = args.state_file.clone() {
        config.state_file = Some(path);
    }
    if args.no_autostart {
        config.autostart = false;
    }
    info!("Configuration: {:?}", config);

    // 1. Storage
    let store: Arc<dyn Storage> = match &config.state_file {
        Some(path) => Arc::new(
            MemoryStore::open(path.clone())
                .with_context(|| format!("Failed to open state file {}", path.display()))?,
        ),
        None => {
            warn!("Store: No state_file configured, instances live in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    // 2. Gateway client and managers
    let transport = ReqwestTransport::new().context("Failed to build HTTP client")?;
    let broker = Arc::new(GatewayClient::new(Arc::new(transport), config.gateway()));
    let manager = Arc::new(InstanceManager::new(broker, store));
    let scheduler = Arc::new(Scheduler::new(manager.clone(), config.intervals()));

    if config.autostart {
        scheduler.start();
    } else {
        info!("Scheduler: Autostart disabled, waiting for POST /scheduler/start");
    }

    // 3. Control API until Ctrl-C
    let app = api::router(AppState {
        manager,
        scheduler: scheduler.clone(),
    });
    api::serve(app, config.server_port, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    })
    .await?;

    scheduler.stop();
    scheduler.stop_market_data();
    info!("=== Fleet Orchestrator Stopped ===");
    Ok(())
}
