// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

#![warn(clippy::all, clippy::pedantic, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::unwrap_used)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

//! Gateway process entry point.

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use zello_fne_gateway::{GatewayConfig, GatewayHost, initialize_logging, load_dotenv};

#[derive(Parser, Debug)]
#[command(name = "zello-fne-gateway")]
#[command(about = "Bridges a Zello channel to a P25/DMR FNE peer.")]
#[command(
    long_about = "Bridges push-to-talk audio and call control between a Zello\n\
channel and a P25/DMR FNE peer. Configuration is read from a YAML file\n\
(see --gen-config for an annotated template); values may be overridden\n\
with environment variables loaded from a '.env' file in the current\n\
directory."
)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), " / ", env!("GIT_VERSION")))]
struct Args {
    /// Path to the gateway's YAML config file. Falls back to
    /// `ZELLO_GATEWAY_CONFIG` if unset, then to `config.yml`.
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Print an annotated default config to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the `RUST_LOG`-style log filter.
    #[arg(long)]
    log_level: Option<String>,

    /// Build and wire the gateway but do not connect to Zello or the FNE peer.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.gen_config {
        print!("{}", GatewayConfig::annotated_default_yaml());
        return Ok(());
    }

    if let Some(level) = &args.log_level {
        // SAFETY: single-threaded at this point in startup, before any other
        // code reads the environment.
        unsafe { std::env::set_var("RUST_LOG", level) };
    }

    let _ = load_dotenv();
    initialize_logging()?;

    let config_path = args
        .config
        .or_else(|| std::env::var("ZELLO_GATEWAY_CONFIG").ok())
        .unwrap_or_else(|| "config.yml".to_string());
    let config = GatewayConfig::load(&config_path)?;

    if args.dry_run {
        let _host = GatewayHost::build(config)?;
        info!("dry run: gateway wired successfully, exiting without connecting");
        return Ok(());
    }

    let mut host = GatewayHost::build(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = host.run(shutdown_rx).await {
        error!("gateway exited with error: {e}");
        return Err(e.into());
    }

    Ok(())
}
