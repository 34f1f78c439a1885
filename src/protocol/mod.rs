//! RESP2 protocol implementation
//!
//! Parsing and encoding of the Redis Serialization Protocol.
//! Independent from the store and the command layer.

mod resp;
mod types;

pub use resp::{RespEncoder, RespParser};
pub use types::{RespError, RespValue};
