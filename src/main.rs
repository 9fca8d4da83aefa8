mod app;
mod bearer;
mod broker;
mod config;
mod error;
mod message;
mod multipart;
mod pipeline;
mod policy;
mod segmentation;
mod spool;

use crate::app::Daemon;
use crate::config::AppConfig;
use crate::error::BridgeError;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("VERSION");

#[derive(Parser)]
#[command(name = "sms-bridge")]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(disable_version_flag = true)]
struct CliArguments {
    #[arg(value_name = "FILE")]
    config: Option<PathBuf>,

    /// Force debug-level logging regardless of `core.log-level`.
    #[arg(short, long)]
    debug: bool,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sms_bridge={default_level}")));

    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("build version: {VERSION}");
}

fn main() -> Result<()> {
    let args = CliArguments::parse();
    if args.version {
        println!("sms-bridge {VERSION}");
        return Ok(());
    }
    init_tracing(args.debug);

    let config_path = args.config;
    let config = match AppConfig::load(config_path.clone()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", BridgeError::Fatal(e));
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut config = config;
        loop {
            let daemon = match Daemon::start(config.clone()).await {
                Ok(daemon) => daemon,
                Err(e) => {
                    error!("{}", BridgeError::Fatal(e));
                    std::process::exit(1);
                }
            };

            let restart = daemon.run().await;
            if !restart {
                info!("shutting down");
                break;
            }

            info!("restarting on SIGHUP");
            config = match AppConfig::load(config_path.clone()) {
                Ok(reloaded) => reloaded,
                Err(e) => {
                    error!("{}", BridgeError::Fatal(e));
                    std::process::exit(1);
                }
            };
        }
    });

    Ok(())
}
