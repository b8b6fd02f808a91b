//! Connection state machine values
//!
//! ```text
//! LISTENING  --(peer accepted)--> CONNECTED
//! LISTENING  --(close)----------> CLOSED
//! CONNECTING --(dial success)---> CONNECTED
//! CONNECTING --(dial failure)---> CLOSED
//! CONNECTED  --(close | EOF | I/O error)--> CLOSED
//! ```
//!
//! CLOSED is terminal.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// State of a chat connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for a peer to connect to our port
    Listening,
    /// Dialing a remote host
    Connecting,
    /// Stream established, lines flow both ways
    Connected,
    /// Terminal state
    Closed,
}

impl ConnectionState {
    /// True once nothing else can happen to the session
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Listening => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Closed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Listening,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Listening => "LISTENING",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Lock-free snapshot of the last committed state.
///
/// Writers must hold the session lock; readers never block.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ConnectionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}
