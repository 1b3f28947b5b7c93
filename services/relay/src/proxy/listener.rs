//! TCP listener and connection acceptance.
//!
//! The listener binds the relay port, accepts inbound connections and hands
//! each one to a fresh [`ConnectionBridge`] running in its own task. Accepting
//! never waits on a bridge.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use super::bridge::ConnectionBridge;
use super::flag_raised;
use super::flow::Direction;
use super::registry::ActiveBridges;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::notifier::EventNotifier;

/// Pending-connection backlog of the listening socket.
pub const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Relay counters, shared by the listener and every bridge.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Bridges currently running.
    pub connections_active: AtomicU64,
    /// Bridges that finished.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to the connection limit.
    pub connections_rejected: AtomicU64,
    /// Outbound connects that succeeded.
    pub target_connected: AtomicU64,
    /// Outbound connects that failed or timed out.
    pub connect_failures: AtomicU64,
    /// Bytes written to the target.
    pub bytes_to_target: AtomicU64,
    /// Bytes written back to callers.
    pub bytes_from_target: AtomicU64,
}

impl RelayStats {
    pub(crate) fn record_forwarded(&self, direction: Direction, bytes: usize) {
        let counter = match direction {
            Direction::Upstream => &self.bytes_to_target,
            Direction::Downstream => &self.bytes_from_target,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            target_connected: self.target_connected.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            bytes_to_target: self.bytes_to_target.load(Ordering::Relaxed),
            bytes_from_target: self.bytes_from_target.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`RelayStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_closed: u64,
    pub connections_rejected: u64,
    pub target_connected: u64,
    pub connect_failures: u64,
    pub bytes_to_target: u64,
    pub bytes_from_target: u64,
}

/// Accepts inbound connections for one relay.
pub struct Listener {
    listener: TcpListener,
    config: Arc<RelayConfig>,
    notifier: Arc<dyn EventNotifier>,
    bridges: Arc<ActiveBridges>,
    conn_semaphore: Arc<Semaphore>,
    stats: Arc<RelayStats>,
    next_bridge_id: AtomicU64,
}

impl Listener {
    /// Bind the configured port.
    pub async fn bind(
        config: Arc<RelayConfig>,
        notifier: Arc<dyn EventNotifier>,
        bridges: Arc<ActiveBridges>,
        stats: Arc<RelayStats>,
    ) -> Result<Self, RelayError> {
        let addr = config.bind_addr();
        let listener = bind_socket(addr).map_err(|source| RelayError::Bind { addr, source })?;

        info!(
            bind_addr = %addr,
            max_connections = config.max_connections(),
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections())),
            listener,
            config,
            notifier,
            bridges,
            stats,
            next_bridge_id: AtomicU64::new(1),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is raised.
    ///
    /// The listening socket is closed when this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(target_addr = %self.config.target(), "Listener started");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = flag_raised(&mut shutdown) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => self.accept(stream, peer_addr, &shutdown).await,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        info!("Listener stopped");
    }

    async fn accept(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shutdown: &watch::Receiver<bool>,
    ) {
        let permit = match self.conn_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats
                    .connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                return;
            }
        };

        let guard = ConnectionGuard::new(Arc::clone(&self.stats), permit);

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on inbound leg");
        }

        let id = self.next_bridge_id.fetch_add(1, Ordering::Relaxed);
        let bridge = ConnectionBridge::new(
            id,
            stream,
            peer_addr,
            Arc::clone(&self.config),
            Arc::clone(&self.notifier),
            Arc::clone(&self.stats),
        );
        let state = bridge.subscribe();
        let shutdown = shutdown.clone();

        let task = async move {
            debug!("Bridge created");
            match bridge.run(shutdown).await {
                Ok(()) => debug!("Bridge closed"),
                Err(e @ RelayError::Connect { .. }) => {
                    warn!(error = %e, reason = e.reason_code(), "Failed to open target connection");
                }
                Err(e) => {
                    debug!(error = %e, reason = e.reason_code(), "Bridge closed with error");
                }
            }

            drop(guard);
        }
        .instrument(tracing::info_span!("connection", bridge_id = id, peer = %peer_addr));

        self.bridges.spawn(id, peer_addr, state, task).await;
    }
}

/// Accounts for one accepted connection until its bridge task ends.
///
/// Dropped on completion and on abort alike, so the counters and the
/// connection-limit permit stay correct when `stop` cancels a bridge.
pub(crate) struct ConnectionGuard {
    stats: Arc<RelayStats>,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionGuard {
    pub(crate) fn new(stats: Arc<RelayStats>, permit: OwnedSemaphorePermit) -> Self {
        stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        stats.connections_active.fetch_add(1, Ordering::Relaxed);
        Self {
            stats,
            _permit: permit,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Create the listening socket with address reuse and the relay backlog.
fn bind_socket(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}
