//! tcp-relay
//!
//! Listens on one port and forwards every accepted connection to a fixed
//! target host:port, relaying bytes unmodified in both directions.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tcp_relay::{ConsoleNotifier, EventNotifier, NoopNotifier, RelayServer};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    // Initialize tracing (prefer RUST_LOG, fallback to --debug)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level().into()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let config = args.relay_config()?;
    info!(
        bind_addr = %config.bind_addr(),
        target_addr = %config.target(),
        verbose = args.verbose,
        "Configuration loaded"
    );

    let notifier: Arc<dyn EventNotifier> = if args.verbose {
        Arc::new(ConsoleNotifier::stdout(
            config.listen_port(),
            config.target(),
        ))
    } else {
        Arc::new(NoopNotifier)
    };

    let server = RelayServer::start(config, notifier).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    server.stop().await;
    Ok(())
}
