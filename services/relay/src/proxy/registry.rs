//! Set of active bridges.
//!
//! The acceptor inserts, each bridge task removes itself when it finishes.
//! Insertion happens under the same lock that the bridge task must take to
//! remove itself, so a bridge that finishes immediately can never be removed
//! before it was inserted.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use super::bridge::{BridgeId, BridgeState};

/// Point-in-time view of one bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    pub id: BridgeId,
    pub peer_addr: SocketAddr,
    pub state: BridgeState,
}

struct BridgeEntry {
    peer_addr: SocketAddr,
    state: watch::Receiver<BridgeState>,
    task: JoinHandle<()>,
}

/// Bridges currently owned by a relay server.
pub struct ActiveBridges {
    bridges: Mutex<HashMap<BridgeId, BridgeEntry>>,
    emptied: Notify,
}

impl ActiveBridges {
    pub fn new() -> Self {
        Self {
            bridges: Mutex::new(HashMap::new()),
            emptied: Notify::new(),
        }
    }

    /// Spawn a bridge task and track it until it completes.
    pub async fn spawn<F>(
        self: &Arc<Self>,
        id: BridgeId,
        peer_addr: SocketAddr,
        state: watch::Receiver<BridgeState>,
        task: F,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut bridges = self.bridges.lock().await;

        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            task.await;
            registry.remove(id).await;
        });

        bridges.insert(
            id,
            BridgeEntry {
                peer_addr,
                state,
                task: handle,
            },
        );
    }

    async fn remove(&self, id: BridgeId) {
        let mut bridges = self.bridges.lock().await;
        if bridges.remove(&id).is_some() {
            debug!(bridge_id = id, remaining = bridges.len(), "Bridge removed");
        }
        if bridges.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    /// Number of bridges that have not finished yet.
    pub async fn len(&self) -> usize {
        self.bridges.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bridges.lock().await.is_empty()
    }

    /// Snapshot of every tracked bridge, ordered by id.
    pub async fn snapshot(&self) -> Vec<BridgeInfo> {
        let bridges = self.bridges.lock().await;
        let mut infos: Vec<_> = bridges
            .iter()
            .map(|(id, entry)| BridgeInfo {
                id: *id,
                peer_addr: entry.peer_addr,
                state: *entry.state.borrow(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Wait until no bridge is tracked.
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty().await {
                return;
            }
            notified.await;
        }
    }

    /// Abort every remaining bridge task and wait until each one has been
    /// dropped. Returns how many were aborted.
    pub async fn abort_all(&self) -> usize {
        let tasks: Vec<_> = {
            let mut bridges = self.bridges.lock().await;
            let tasks = bridges.drain().map(|(_, entry)| entry.task).collect();
            self.emptied.notify_waiters();
            tasks
        };

        let count = tasks.len();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        count
    }
}

impl Default for ActiveBridges {
    fn default() -> Self {
        Self::new()
    }
}
