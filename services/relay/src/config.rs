//! Relay configuration.
//!
//! A [`RelayConfig`] is validated once when it is built; a config that made it
//! past [`RelayConfig::new`] and the `with_*` setters is safe to bind with.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::RelayError;

/// Default address the listener binds to (all IPv4 interfaces).
pub const DEFAULT_LISTEN_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default timeout for the outbound connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period for flushing in-flight writes during teardown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Default maximum concurrent bridges.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Default read buffer size per direction.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Immutable relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Port to accept inbound connections on.
    listen_port: u16,
    /// Interface to bind.
    listen_addr: IpAddr,
    /// Host every bridge connects to.
    target_host: String,
    /// Port every bridge connects to.
    target_port: u16,
    /// Bound on the outbound connect.
    connect_timeout: Duration,
    /// Bound on flushing in-flight writes once a bridge starts closing.
    shutdown_grace: Duration,
    /// Maximum concurrent bridges.
    max_connections: usize,
    /// Read buffer size, i.e. the largest chunk a single read can produce.
    chunk_size: usize,
}

impl RelayConfig {
    /// Create a validated configuration with default tunables.
    pub fn new(
        listen_port: u16,
        target_host: impl Into<String>,
        target_port: u16,
    ) -> Result<Self, RelayError> {
        let config = Self {
            listen_port,
            listen_addr: DEFAULT_LISTEN_ADDR,
            target_host: target_host.into().trim().to_string(),
            target_port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        };
        config.validate()?;
        Ok(config)
    }

    /// Bind to a specific interface instead of all of them.
    pub fn with_listen_addr(mut self, listen_addr: IpAddr) -> Self {
        self.listen_addr = listen_addr;
        self
    }

    /// Override the outbound connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Result<Self, RelayError> {
        self.connect_timeout = timeout;
        self.validate()?;
        Ok(self)
    }

    /// Override the teardown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Override the concurrent bridge limit.
    pub fn with_max_connections(mut self, max_connections: usize) -> Result<Self, RelayError> {
        self.max_connections = max_connections;
        self.validate()?;
        Ok(self)
    }

    /// Override the read buffer size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, RelayError> {
        self.chunk_size = chunk_size;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.listen_port == 0 {
            return Err(RelayError::InvalidConfig(
                "listen port must be between 1 and 65535".to_string(),
            ));
        }
        if self.target_port == 0 {
            return Err(RelayError::InvalidConfig(
                "target port must be between 1 and 65535".to_string(),
            ));
        }
        if self.target_host.is_empty() {
            return Err(RelayError::InvalidConfig(
                "target host must not be empty".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(RelayError::InvalidConfig(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(RelayError::InvalidConfig(
                "max connections must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(RelayError::InvalidConfig(
                "chunk size must be at least 1 byte".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Socket address the listener binds.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.listen_port)
    }

    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    pub fn target_port(&self) -> u16 {
        self.target_port
    }

    /// `host:port` of the target, for logs and error messages.
    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
