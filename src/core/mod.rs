//! Connection core.
//!
//! Everything that touches the network lives here:
//!
//! - **state**: `ConnectionState` and its lock-free snapshot cell
//! - **transport**: TCP bind/accept/dial and line-oriented I/O
//! - **session**: `ConnectionSession`, one chat connection and its worker thread
//!
//! # Architecture
//!
//! ```text
//! ConnectionSession
//! ├── Mutex<Inner> (listener, write half, event sender)
//! ├── StateCell (readable without locking)
//! └── worker thread: accept | dial, then read loop
//!     └── mpsc::Sender<SessionEvent> ──▶ owner
//! ```

pub mod state;
pub mod transport;
pub mod session;

pub use session::{ConnectionSession, SessionEvent, SessionOptions, StateReason};
pub use state::ConnectionState;
