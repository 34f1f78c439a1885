//! redmock - an in-process, protocol-compatible Redis test double
//!
//! Layered the same way top to bottom:
//! - `protocol`: RESP2 framing, independent of everything else
//! - `store`: typed values, the sequenced map, streams and sorted sets
//! - `executor`: the server lock, wake-up broadcasts and blocking waits
//! - `commands`: one handler per command over a locked context
//! - `dispatch`: per-connection sessions (SELECT, MULTI/EXEC)
//! - `server`: tokio accept loop and connections

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod server;
pub mod store;

/// Re-export commonly used types
pub use commands::{Command, CommandContext, CommandRegistry};
pub use config::ServiceOptions;
pub use dispatch::Session;
pub use error::{CommandError, CommandResult};
pub use executor::Coordinator;
pub use protocol::{RespError, RespValue};
pub use server::MockServer;
pub use store::{Database, Entry, Value};
