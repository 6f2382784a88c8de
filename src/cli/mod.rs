use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::app::App;
use crate::config::load_config;
use crate::server;
use crate::shutdown::Shutdown;
use crate::task_monitor::TaskMonitor;

pub mod logging;

use logging::LoggingOptions;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub log: LoggingOptions,

    /// Path to a TOML config file. Environment variables (`PROC__...`)
    /// always take precedence over values loaded from this file.
    #[arg(long, env = "PROC_CONFIG")]
    pub config: Option<PathBuf>,
}

/// # Errors
///
/// Will return `Err` if the tracing subscriber cannot be installed, the
/// config cannot be loaded, or the app fails to start.
pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing::subscriber::set_global_default(Registry::default().with(cli.log.to_layer()?))
        .context("failed to install tracing subscriber")?;

    let config = load_config(cli.config.as_deref())?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "starting up"
    );

    let shutdown = Shutdown::spawn(config.app.shutdown_timeout, config.app.shutdown_delay);
    let server_config = config.server.clone();

    let app = App::new(config).await?;

    TaskMonitor::init(app.clone(), shutdown.clone()).await;

    server::run(app, server_config, Arc::new(shutdown)).await?;

    info!("program terminating normally");

    Ok(())
}
