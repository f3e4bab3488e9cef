//! Per-connection bookkeeping.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Connection state.
///
/// A connection only ever moves forward: it answers at most one request and
/// then closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no complete frame yet.
    AwaitingData,
    /// At least one frame is being dispatched.
    Processing,
    /// The first finished response has been written.
    Responded,
    /// The connection is gone.
    Closed,
}

/// One accepted client connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection ID, used to correlate log lines.
    pub id: String,

    /// Remote address.
    pub peer: SocketAddr,

    state: ConnectionState,

    /// Frames decoded so far, including ones still in flight.
    frames_received: u64,

    created_at: Instant,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            peer,
            state: ConnectionState::AwaitingData,
            frames_received: 0,
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Returns how long the connection has been open.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Records a decoded frame.
    pub fn frame_received(&mut self) {
        self.frames_received += 1;
        if self.state == ConnectionState::AwaitingData {
            self.transition(ConnectionState::Processing);
        }
    }

    /// Records that the single response has been written.
    pub fn responded(&mut self) {
        if self.state != ConnectionState::Closed {
            self.transition(ConnectionState::Responded);
        }
    }

    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.transition(ConnectionState::Closed);
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::debug!(
            "[{}] {} state {:?} -> {:?}",
            self.peer,
            self.id,
            self.state,
            next
        );
        self.state = next;
    }
}
