//! Relay event notification.
//!
//! The relay reports lifecycle and data-path events to an [`EventNotifier`].
//! Which notifier is used is decided once, when the server is started.
//!
//! Naming follows the relay's two roles: the *server* side is the listening
//! side facing callers, the *client* side is the outbound connection facing
//! the target. For one chunk flowing caller → target the notifier sees
//! `on_request`, `on_server_receive`, then `on_server_send` once the write
//! to the target completed. For target → caller it sees `on_response`,
//! `on_client_receive`, then `on_client_send`.
//!
//! Callbacks run inline on the bridge's task and must return promptly; a slow
//! callback stalls that direction of that connection.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use colored::Colorize;
use tracing::warn;

use crate::error::RelayError;

/// Observer of relay events.
///
/// Every method defaults to doing nothing, so implementations only override
/// what they care about.
pub trait EventNotifier: Send + Sync {
    /// The listener is bound and accepting.
    fn on_start(&self) {}

    /// The server is about to stop.
    fn on_stop(&self) {}

    /// A caller sent a chunk.
    fn on_request(&self, _data: &[u8]) {}

    /// The target sent a chunk.
    fn on_response(&self, _data: &[u8]) {}

    /// A chunk was read from the caller-facing leg.
    fn on_server_receive(&self, _data: &[u8]) {}

    /// A caller chunk was written to the target.
    fn on_server_send(&self, _data: &[u8]) {}

    /// A chunk was read from the target-facing leg.
    fn on_client_receive(&self, _data: &[u8]) {}

    /// A target chunk was written back to the caller.
    fn on_client_send(&self, _data: &[u8]) {}
}

/// Notifier that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {}

/// Notifier that prints a human-readable transcript of the relay.
pub struct ConsoleNotifier {
    listen_port: u16,
    target: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleNotifier {
    /// Print to stdout.
    pub fn stdout(listen_port: u16, target: impl Into<String>) -> Self {
        Self::with_writer(listen_port, target, Box::new(io::stdout()))
    }

    /// Print to an arbitrary sink.
    pub fn with_writer(
        listen_port: u16,
        target: impl Into<String>,
        out: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            listen_port,
            target: target.into(),
            out: Mutex::new(out),
        }
    }

    fn print(&self, label: &str, data: Option<&[u8]>) {
        // A poisoned sink only means an earlier print panicked mid-line.
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = match data {
            Some(data) => writeln!(
                out,
                "{} {}",
                label.bold(),
                String::from_utf8_lossy(data)
            ),
            None => writeln!(out, "{}", label.bold()),
        };
        if let Err(e) = result.and_then(|()| out.flush()) {
            warn!(error = %e, "Failed to write relay event");
        }
    }
}

impl EventNotifier for ConsoleNotifier {
    fn on_start(&self) {
        self.print(
            &format!(
                "Starting proxy on port {} redirecting to {}",
                self.listen_port, self.target
            ),
            None,
        );
    }

    fn on_stop(&self) {
        self.print("Stopping proxy", None);
    }

    fn on_request(&self, data: &[u8]) {
        self.print("Received request:", Some(data));
    }

    fn on_response(&self, data: &[u8]) {
        self.print("Received response:", Some(data));
    }

    fn on_server_send(&self, data: &[u8]) {
        self.print("Sent to target:", Some(data));
    }

    fn on_client_send(&self, data: &[u8]) {
        self.print("Sent to caller:", Some(data));
    }
}

/// Invoke a notifier callback, containing any panic it raises.
///
/// A misbehaving notifier must never take a bridge down with it; the panic is
/// logged and relaying carries on.
pub(crate) fn dispatch(
    notifier: &dyn EventNotifier,
    event: &'static str,
    callback: impl FnOnce(&dyn EventNotifier),
) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(notifier))).is_err() {
        let err = RelayError::Notifier { event };
        warn!(error = %err, "Event notifier panicked, continuing");
    }
}
