//! Command-line arguments.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use tcp_relay::config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_CONNECTIONS, DEFAULT_SHUTDOWN_GRACE,
};
use tcp_relay::RelayConfig;

/// tcp-relay - Forward TCP connections to a fixed target.
#[derive(Debug, Parser)]
#[command(name = "tcp-relay")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Port to listen on.
    #[arg(short = 'p', long, env = "RELAY_PORT")]
    pub port: u16,

    /// Host to forward connections to.
    #[arg(long, alias = "targetHost", env = "RELAY_TARGET_HOST")]
    pub target_host: String,

    /// Port to forward connections to.
    #[arg(long, alias = "targetPort", env = "RELAY_TARGET_PORT")]
    pub target_port: u16,

    /// Print relayed traffic to the console.
    #[arg(
        long,
        env = "RELAY_VERBOSE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub verbose: bool,

    /// Enable debug logs.
    #[arg(long, env = "RELAY_DEBUG")]
    pub debug: bool,

    /// Interface to bind.
    #[arg(long, env = "RELAY_BIND", default_value_t = DEFAULT_LISTEN_ADDR)]
    pub bind: IpAddr,

    /// Timeout for connecting to the target, in milliseconds.
    #[arg(long, env = "RELAY_CONNECT_TIMEOUT_MS", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    pub connect_timeout_ms: u64,

    /// Grace period for flushing in-flight data on shutdown, in milliseconds.
    #[arg(long, env = "RELAY_SHUTDOWN_GRACE_MS", default_value_t = DEFAULT_SHUTDOWN_GRACE.as_millis() as u64)]
    pub shutdown_grace_ms: u64,

    /// Maximum concurrent connections.
    #[arg(long, env = "RELAY_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,
}

impl Args {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    /// Build the validated relay configuration.
    pub fn relay_config(&self) -> Result<RelayConfig> {
        let config = RelayConfig::new(self.port, self.target_host.as_str(), self.target_port)
            .context("Invalid relay configuration")?
            .with_listen_addr(self.bind)
            .with_shutdown_grace(Duration::from_millis(self.shutdown_grace_ms))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .context("Invalid connect timeout")?
            .with_max_connections(self.max_connections)
            .context("Invalid connection limit")?;
        Ok(config)
    }
}
