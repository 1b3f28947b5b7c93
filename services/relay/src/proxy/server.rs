//! Relay server lifecycle.
//!
//! [`RelayServer::start`] returns a running server; [`RelayServer::stop`]
//! consumes it. Dropping a running server without calling `stop` still raises
//! the shutdown signal, but does not wait for bridges to drain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn, Instrument};

use super::listener::{Listener, RelayStats, RelayStatsSnapshot};
use super::registry::{ActiveBridges, BridgeInfo};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::notifier::{dispatch, EventNotifier};

/// Extra time `stop` allows on top of the bridge grace period before
/// aborting stragglers.
const STOP_MARGIN: Duration = Duration::from_millis(500);

/// A running TCP relay.
pub struct RelayServer {
    local_addr: SocketAddr,
    config: Arc<RelayConfig>,
    notifier: Arc<dyn EventNotifier>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    bridges: Arc<ActiveBridges>,
    stats: Arc<RelayStats>,
}

impl RelayServer {
    /// Bind the listening port and start accepting.
    ///
    /// Fails with [`RelayError::Bind`] if the port cannot be acquired; nothing
    /// is left running in that case and the notifier is not told.
    pub async fn start(
        config: RelayConfig,
        notifier: Arc<dyn EventNotifier>,
    ) -> Result<Self, RelayError> {
        let config = Arc::new(config);
        let bridges = Arc::new(ActiveBridges::new());
        let stats = Arc::new(RelayStats::default());

        let listener = Listener::bind(
            Arc::clone(&config),
            Arc::clone(&notifier),
            Arc::clone(&bridges),
            Arc::clone(&stats),
        )
        .await?;
        let local_addr = listener.local_addr().map_err(|source| RelayError::Bind {
            addr: config.bind_addr(),
            source,
        })?;

        dispatch(notifier.as_ref(), "start", |notify| notify.on_start());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(
            listener
                .run(shutdown_rx)
                .instrument(tracing::info_span!("listener", bind_addr = %local_addr)),
        );

        info!(
            bind_addr = %local_addr,
            target_addr = %config.target(),
            "Relay started"
        );

        Ok(Self {
            local_addr,
            config,
            notifier,
            shutdown_tx,
            accept_task,
            bridges,
            stats,
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of bridges that have not reached `Closed` yet.
    pub async fn active_bridges(&self) -> usize {
        self.bridges.len().await
    }

    /// Per-bridge view, ordered by bridge id.
    pub async fn bridges(&self) -> Vec<BridgeInfo> {
        self.bridges.snapshot().await
    }

    /// Stop accepting, close every bridge and release the port.
    ///
    /// Bridges get the configured grace period to flush in-flight writes;
    /// whatever is still running afterwards is aborted, so this always
    /// returns in bounded time.
    pub async fn stop(self) {
        info!(bind_addr = %self.local_addr, "Stopping relay");

        dispatch(self.notifier.as_ref(), "stop", |notify| notify.on_stop());

        self.shutdown_tx.send_replace(true);

        if let Err(e) = self.accept_task.await {
            error!(error = %e, "Listener task failed");
        }

        let drain_budget = self.config.shutdown_grace() + STOP_MARGIN;
        if timeout(drain_budget, self.bridges.wait_empty()).await.is_err() {
            let aborted = self.bridges.abort_all().await;
            warn!(aborted, "Aborted bridges that outlived the grace period");
        }

        info!(bind_addr = %self.local_addr, "Relay stopped");
    }
}
