//! L4 TCP relay.
//!
//! This module provides:
//! - The listening socket and accept loop
//! - One connection bridge per accepted connection
//! - Per-direction flow control
//! - The server that owns all of the above
//!
//! ## Architecture
//!
//! ```text
//! Caller -> Listener -> ConnectionBridge -> Target
//!                          |      ^
//!                   upstream      downstream   (one FlowController each)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use tcp_relay::{NoopNotifier, RelayConfig, RelayServer};
//!
//! let config = RelayConfig::new(8080, "localhost", 9090)?;
//! let server = RelayServer::start(config, Arc::new(NoopNotifier)).await?;
//! tokio::signal::ctrl_c().await?;
//! server.stop().await;
//! ```

mod bridge;
mod flow;
mod listener;
mod registry;
mod server;

pub use bridge::{BridgeId, BridgeState, ConnectionBridge};
pub use flow::{Direction, FlowController, FlowState};
pub use listener::{Listener, RelayStats, RelayStatsSnapshot, LISTEN_BACKLOG};
pub use registry::{ActiveBridges, BridgeInfo};
pub use server::RelayServer;

use tokio::sync::watch;

/// Resolves once the flag is raised or its sender went away.
pub(crate) async fn flag_raised(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|raised| *raised).await;
}
