//! User interface: input parsing and console output.
//!
//! - **commands**: console input line to `Command` (including port validation)
//! - **console**: colored transcript and status printing
//!
//! The UI never touches sockets; it drives a `ConnectionSession` through the
//! application controller and renders what the session reports.

pub mod commands;
pub mod console;

pub use commands::Command;
pub use console::Console;
