//! Entry point: parse `--config <path>`, load configuration, wire up
//! logging, start the daemon, and block until a termination signal
//! triggers the graceful shutdown sequence.

use std::path::PathBuf;

use driftmesh::config;
use driftmesh::daemon::Daemon;
use driftmesh::log;

fn parse_config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    PathBuf::from("config.toml")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = parse_config_path();
    let cfg = config::Config::load(&config_path)?;

    let log_dir = PathBuf::from(&cfg.filesystem.root_path)
        .parent()
        .map(|p| p.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    log::setup_logger(&cfg.logging, &log_dir)?;

    ::log::info!("NodeDaemon initialized: {}", cfg.node.name);

    let daemon = Daemon::new(cfg)?;
    let tasks = daemon.start().await?;

    tokio::signal::ctrl_c().await?;
    ::log::info!("shutdown signal received, stopping NodeDaemon...");
    tasks.shutdown().await;
    ::log::info!("NodeDaemon stopped");

    Ok(())
}
