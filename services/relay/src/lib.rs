//! TCP relay.
//!
//! Accepts inbound TCP connections and pairs each with an outbound connection
//! to one fixed target, forwarding bytes unmodified in both directions.

pub mod config;
pub mod error;
pub mod notifier;
pub mod proxy;

pub use config::RelayConfig;
pub use error::RelayError;
pub use notifier::{ConsoleNotifier, EventNotifier, NoopNotifier};
pub use proxy::{
    BridgeInfo, BridgeState, ConnectionBridge, Direction, FlowController, FlowState, Listener,
    RelayServer, RelayStats, RelayStatsSnapshot,
};
