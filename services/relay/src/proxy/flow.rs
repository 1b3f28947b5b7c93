//! Per-direction flow control.
//!
//! A direction may only read from its source leg while it holds read demand.
//! Demand is granted once when the bridge starts relaying and afterwards only
//! when the forwarding write to the opposite leg has completed, so at most
//! one chunk per direction is ever buffered inside the relay.

use std::fmt;

/// Which way data flows through a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Caller → target.
    Upstream,
    /// Target → caller.
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("upstream"),
            Direction::Downstream => f.write_str("downstream"),
        }
    }
}

/// Read state of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No read may be issued on the source leg.
    Paused,
    /// Exactly one read may be issued on the source leg.
    Reading,
}

/// Flow controller for one direction of a bridge.
#[derive(Debug)]
pub struct FlowController {
    direction: Direction,
    state: FlowState,
    /// Length of the chunk read but not yet acknowledged by the peer.
    in_flight: Option<usize>,
    chunks_forwarded: u64,
    bytes_forwarded: u64,
}

impl FlowController {
    /// Create a controller with reading disabled.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: FlowState::Paused,
            in_flight: None,
            chunks_forwarded: 0,
            bytes_forwarded: 0,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Whether a read may be issued now.
    pub fn can_read(&self) -> bool {
        self.state == FlowState::Reading
    }

    /// Grant the initial read demand once both legs are connected.
    ///
    /// Has no effect while a chunk is in flight.
    pub fn enable(&mut self) {
        if self.in_flight.is_none() {
            self.state = FlowState::Reading;
        }
    }

    /// A read produced a chunk of `len` bytes; reading pauses until it is
    /// acknowledged.
    pub fn on_chunk(&mut self, len: usize) {
        debug_assert!(self.can_read(), "{} read without demand", self.direction);
        debug_assert!(self.in_flight.is_none(), "{} chunk already in flight", self.direction);
        self.state = FlowState::Paused;
        self.in_flight = Some(len);
    }

    /// The forwarding write completed; exactly one further read is allowed.
    pub fn on_write_complete(&mut self) {
        if let Some(len) = self.in_flight.take() {
            self.chunks_forwarded += 1;
            self.bytes_forwarded += len as u64;
        }
        self.state = FlowState::Reading;
    }

    /// Stop granting demand, e.g. once the bridge is closing.
    pub fn pause(&mut self) {
        self.state = FlowState::Paused;
    }

    /// Bytes read but not yet written to the peer.
    pub fn buffered(&self) -> usize {
        self.in_flight.unwrap_or(0)
    }

    pub fn chunks_forwarded(&self) -> u64 {
        self.chunks_forwarded
    }

    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes_forwarded
    }
}
