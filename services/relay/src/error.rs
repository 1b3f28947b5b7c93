//! Error types for the relay.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::proxy::Direction;

/// Relay errors with standardized reason codes.
///
/// Only [`RelayError::Bind`] (and a config that never validated) is fatal to
/// the server. Everything else is scoped to the bridge that produced it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration rejected before any socket was opened.
    #[error("invalid_config: {0}")]
    InvalidConfig(String),

    /// The listening socket could not be acquired.
    #[error("bind_failed: {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The outbound leg of a bridge could not be established.
    #[error("connect_failed: {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    /// A read or write failed mid-relay.
    #[error("forward_failed: {direction}: {source}")]
    Forward {
        direction: Direction,
        #[source]
        source: io::Error,
    },

    /// An event notifier callback panicked.
    #[error("notifier_failed: {event}")]
    Notifier { event: &'static str },
}

impl RelayError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            RelayError::InvalidConfig(_) => "invalid_config",
            RelayError::Bind { .. } => "bind_failed",
            RelayError::Connect { .. } => "connect_failed",
            RelayError::Forward { .. } => "forward_failed",
            RelayError::Notifier { .. } => "notifier_failed",
        }
    }

    pub(crate) fn forward(direction: Direction, source: io::Error) -> Self {
        RelayError::Forward { direction, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = RelayError::Connect {
            target: "localhost:1".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(err.reason_code(), "connect_failed");
        assert!(err.to_string().starts_with("connect_failed: localhost:1"));

        let err = RelayError::forward(
            Direction::Upstream,
            io::Error::from(io::ErrorKind::BrokenPipe),
        );
        assert_eq!(err.reason_code(), "forward_failed");
        assert!(err.to_string().contains("upstream"));
    }
}
