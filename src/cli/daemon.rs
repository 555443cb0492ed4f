use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Args;
use tokio::signal;
use tracing::info;

use super::CliContext;
use pocketflow::{
    config::{Config, ConfigManager, ConfigOverrides, EnvConfigManager},
    daemon::{DaemonConfig, FlowDaemon},
    logger::init_tracing,
};

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Directory of flow files loaded on start
    #[arg(long, default_value = "flows")]
    pub flows_dir: PathBuf,

    #[arg(long, default_value_t = 1000)]
    pub heartbeat_ms: u64,

    /// Settings file loaded into the environment
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,
}

pub async fn execute(args: DaemonArgs, context: &CliContext) -> anyhow::Result<()> {
    let config_manager = ConfigManager(EnvConfigManager::new(args.env_file));
    let config = Config::load(ConfigOverrides::default(), &config_manager)
        .await
        .context("Invalid configuration")?;

    let level = if config.debug { "debug" } else { config.log_level.as_str() };
    init_tracing(level, Some(&config.logs_dir))?;
    info!("Loaded configuration: {:?}", config);

    let daemon = FlowDaemon::new(DaemonConfig {
        heartbeat: Duration::from_millis(args.heartbeat_ms),
        ..DaemonConfig::from(&config)
    })
    .with_flow_dir(args.flows_dir, context.registry.clone());

    daemon.start().await?;
    println!("pocketflow daemon running with flows: {:?}", daemon.list());

    signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");
    daemon.stop().await;
    Ok(())
}
