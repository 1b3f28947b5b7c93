//! Connection bridge.
//!
//! One bridge pairs one accepted inbound connection with exactly one outbound
//! connection to the configured target and relays between them:
//!
//! ```text
//! Idle -> Connecting -> Relaying -> Closing -> Closed
//!              |                       ^
//!              +-----------------------+  (connect failed / shutdown)
//! ```
//!
//! Both directions are driven by the bridge's own task. Each direction reads
//! one chunk, hands it to the notifier, writes it to the opposite leg and
//! only then reads again (see [`FlowController`]).

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::flag_raised;
use super::flow::{Direction, FlowController};
use super::listener::RelayStats;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::notifier::{dispatch, EventNotifier};

/// Lifecycle state of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Inbound leg accepted, outbound leg not yet requested.
    Idle,
    /// Outbound connect in flight.
    Connecting,
    /// Both legs established.
    Relaying,
    /// One leg finished; the other is flushing and closing.
    Closing,
    /// Both legs released.
    Closed,
}

impl BridgeState {
    fn can_transition_to(self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Relaying)
                | (Connecting, Closing)
                | (Relaying, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Idle => "idle",
            BridgeState::Connecting => "connecting",
            BridgeState::Relaying => "relaying",
            BridgeState::Closing => "closing",
            BridgeState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Identifier of a bridge within one server.
pub type BridgeId = u64;

/// Publishes state transitions so the server can observe its bridges.
struct Lifecycle {
    id: BridgeId,
    tx: watch::Sender<BridgeState>,
}

impl Lifecycle {
    /// Move to `next` if that is a legal step; repeated or stale transitions
    /// are ignored.
    fn transition(&self, next: BridgeState) {
        let id = self.id;
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!(bridge_id = id, from = %state, to = %next, "Bridge state change");
                *state = next;
                true
            } else {
                false
            }
        });
    }
}

/// Pairs one inbound connection with one outbound connection.
pub struct ConnectionBridge {
    peer_addr: SocketAddr,
    inbound: TcpStream,
    config: Arc<RelayConfig>,
    notifier: Arc<dyn EventNotifier>,
    stats: Arc<RelayStats>,
    lifecycle: Lifecycle,
}

impl ConnectionBridge {
    /// Create an idle bridge for an accepted connection.
    pub fn new(
        id: BridgeId,
        inbound: TcpStream,
        peer_addr: SocketAddr,
        config: Arc<RelayConfig>,
        notifier: Arc<dyn EventNotifier>,
        stats: Arc<RelayStats>,
    ) -> Self {
        let (tx, _) = watch::channel(BridgeState::Idle);
        Self {
            peer_addr,
            inbound,
            config,
            notifier,
            stats,
            lifecycle: Lifecycle { id, tx },
        }
    }

    /// Watch this bridge's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.lifecycle.tx.subscribe()
    }

    /// Drive the bridge to completion.
    ///
    /// Returns once both legs are closed. `shutdown` flipping to `true` (or its
    /// sender going away) moves the bridge to closing: a pending connect is
    /// abandoned and in-flight writes get the configured grace period.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), RelayError> {
        let Self {
            peer_addr,
            mut inbound,
            config,
            notifier,
            stats,
            lifecycle,
        } = self;

        lifecycle.transition(BridgeState::Connecting);

        let connected = tokio::select! {
            result = connect(&config) => Some(result),
            _ = flag_raised(&mut shutdown) => None,
        };

        let mut outbound = match connected {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                lifecycle.transition(BridgeState::Closing);
                let _ = inbound.shutdown().await;
                drop(inbound);
                lifecycle.transition(BridgeState::Closed);
                return Err(e);
            }
            None => {
                debug!(peer_addr = %peer_addr, "Shutdown while connecting to target");
                lifecycle.transition(BridgeState::Closing);
                drop(inbound);
                lifecycle.transition(BridgeState::Closed);
                return Ok(());
            }
        };

        stats.target_connected.fetch_add(1, Ordering::Relaxed);
        debug!(
            peer_addr = %peer_addr,
            target_addr = %config.target(),
            "Connected to target"
        );
        lifecycle.transition(BridgeState::Relaying);

        let result = {
            let (mut in_read, mut in_write) = inbound.split();
            let (mut out_read, mut out_write) = outbound.split();

            let (closing_tx, mut closing_rx) = watch::channel(false);
            let pumps = async {
                tokio::join!(
                    pump(
                        Direction::Upstream,
                        &mut in_read,
                        &mut out_write,
                        config.chunk_size(),
                        notifier.as_ref(),
                        &stats,
                        &closing_tx,
                    ),
                    pump(
                        Direction::Downstream,
                        &mut out_read,
                        &mut in_write,
                        config.chunk_size(),
                        notifier.as_ref(),
                        &stats,
                        &closing_tx,
                    ),
                )
            };
            let teardown_deadline = async {
                tokio::select! {
                    _ = flag_raised(&mut closing_rx) => {}
                    _ = flag_raised(&mut shutdown) => {
                        debug!(peer_addr = %peer_addr, "Shutdown requested, closing bridge");
                        closing_tx.send_replace(true);
                    }
                }
                lifecycle.transition(BridgeState::Closing);
                tokio::time::sleep(config.shutdown_grace()).await;
            };

            tokio::select! {
                biased;
                (upstream, downstream) = pumps => upstream.and(downstream).map(|_| ()),
                _ = teardown_deadline => {
                    warn!(
                        peer_addr = %peer_addr,
                        grace_ms = config.shutdown_grace().as_millis() as u64,
                        "Grace period elapsed, abandoning in-flight writes"
                    );
                    Ok(())
                }
            }
        };

        lifecycle.transition(BridgeState::Closing);
        drop(outbound);
        drop(inbound);
        lifecycle.transition(BridgeState::Closed);

        result
    }
}

/// Open the outbound leg.
async fn connect(config: &RelayConfig) -> Result<TcpStream, RelayError> {
    let target = config.target();
    debug!(target_addr = %target, "Connecting to target");

    let stream = match timeout(
        config.connect_timeout(),
        TcpStream::connect((config.target_host(), config.target_port())),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
    }
    .map_err(|source| RelayError::Connect { target, source })?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY on outbound leg");
    }

    Ok(stream)
}

/// Forward one direction until EOF, error, or the bridge starts closing.
///
/// On exit the destination's write side is shut down and `closing` is raised
/// so the opposite direction stops reading too. Returns bytes forwarded.
async fn pump<R, W>(
    direction: Direction,
    src: &mut R,
    dst: &mut W,
    chunk_size: usize,
    notifier: &dyn EventNotifier,
    stats: &RelayStats,
    closing: &watch::Sender<bool>,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut flow = FlowController::new(direction);
    let mut closing_rx = closing.subscribe();
    let mut buf = vec![0u8; chunk_size];

    flow.enable();

    let result = loop {
        if !flow.can_read() {
            break Ok(());
        }

        let n = tokio::select! {
            biased;
            _ = flag_raised(&mut closing_rx) => {
                flow.pause();
                break Ok(());
            }
            read = src.read(&mut buf) => match read {
                Ok(0) => {
                    debug!(direction = %direction, "Source leg closed");
                    break Ok(());
                }
                Ok(n) => n,
                Err(e) => break Err(RelayError::forward(direction, e)),
            },
        };

        flow.on_chunk(n);
        let chunk = &buf[..n];

        match direction {
            Direction::Upstream => {
                dispatch(notifier, "request", |notify| notify.on_request(chunk));
                dispatch(notifier, "server_receive", |notify| {
                    notify.on_server_receive(chunk)
                });
            }
            Direction::Downstream => {
                dispatch(notifier, "response", |notify| notify.on_response(chunk));
                dispatch(notifier, "client_receive", |notify| {
                    notify.on_client_receive(chunk)
                });
            }
        }

        let written = async {
            dst.write_all(chunk).await?;
            dst.flush().await
        };
        if let Err(e) = written.await {
            break Err(RelayError::forward(direction, e));
        }

        flow.on_write_complete();
        stats.record_forwarded(direction, n);

        match direction {
            Direction::Upstream => {
                dispatch(notifier, "server_send", |notify| notify.on_server_send(chunk))
            }
            Direction::Downstream => {
                dispatch(notifier, "client_send", |notify| notify.on_client_send(chunk))
            }
        }
    };

    closing.send_replace(true);
    let _ = dst.shutdown().await;

    if let Err(e) = &result {
        debug!(error = %e, "Relay direction failed");
    }

    debug!(
        direction = %direction,
        chunks = flow.chunks_forwarded(),
        bytes = flow.bytes_forwarded(),
        "Relay direction finished"
    );

    result.map(|()| flow.bytes_forwarded())
}
