use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Supervises a fleet of remote broker gateways", long_about = None)]
pub struct Args {
    /// TOML configuration file. Environment variables (FLEET_*) still apply on top.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port of the control API (overrides `server_port`).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Snapshot file of the instance store (overrides `state_file`).
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Do not start the instance and health loops at boot.
    #[arg(long)]
    pub no_autostart: bool,
}
