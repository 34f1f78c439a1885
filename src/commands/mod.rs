//! Command execution module
//!
//! Provides a unified interface for all commands through the Command trait.
//! Commands are grouped by the collection kind they work on.

mod context;
mod registry;

// Command implementations
mod admin;
mod hash;
mod key;
mod list;
mod scripting;
mod set;
mod stream;
mod string;
mod ttl;
mod zset;

pub use context::CommandContext;
pub use registry::CommandRegistry;

use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Command execution trait
///
/// All commands implement this trait with a single execute method.
/// Argument counts are checked against `min_args`/`max_args` before
/// `execute` runs, so handlers may index the mandatory arguments directly.
pub trait Command: Send + Sync {
    /// Execute the command with the given context and arguments
    ///
    /// Arguments:
    /// - ctx: the locked execution context (selected database, coordinator state)
    /// - args: command arguments (excluding the command name itself)
    ///
    /// Every argument is validated before the first mutation; an `Err` leaves
    /// the key space untouched.
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue>;

    /// Get the command name (for lookup and logging)
    fn name(&self) -> &'static str;

    /// Get the minimum number of arguments required
    fn min_args(&self) -> usize {
        0
    }

    /// Get the maximum number of arguments (None = unlimited)
    fn max_args(&self) -> Option<usize> {
        None
    }

    /// Whether `redis.call` may invoke this command
    fn allowed_in_script(&self) -> bool {
        true
    }
}

/// Parse a signed 64-bit integer argument
pub(crate) fn parse_int(arg: &[u8]) -> CommandResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

/// Parse a float argument; NaN is refused
pub(crate) fn parse_float(arg: &[u8]) -> CommandResult<f64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(crate::store::zset::parse_score)
        .ok_or(CommandError::NotAFloat)
}

/// Parse a non-negative count (LPOP count, SPOP count, ...)
pub(crate) fn parse_count(arg: &[u8]) -> CommandResult<usize> {
    let count = parse_int(arg)?;
    usize::try_from(count).map_err(|_| CommandError::MustBePositive)
}

/// Case-insensitive match of an option keyword
pub(crate) fn is_option(arg: &[u8], name: &str) -> bool {
    arg.eq_ignore_ascii_case(name.as_bytes())
}

/// Argument as text, for ids and patterns that must be UTF-8
pub(crate) fn arg_str(arg: &[u8]) -> CommandResult<&str> {
    std::str::from_utf8(arg).map_err(|_| CommandError::Syntax)
}

/// Resolve a possibly negative index pair against a length, like LRANGE does.
/// Returns `None` when the range selects nothing.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Wall clock in milliseconds, for stream ids
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reply for an optional bulk value
pub(crate) fn bulk_or_null(value: Option<Bytes>) -> RespValue {
    value.map_or(RespValue::Null, RespValue::BulkString)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_int(b"-42"), Ok(-42));
        assert_eq!(parse_int(b"4.2"), Err(CommandError::NotAnInteger));
        assert_eq!(parse_float(b"4.5"), Ok(4.5));
        assert_eq!(parse_float(b"nan"), Err(CommandError::NotAFloat));
        assert_eq!(parse_count(b"-1"), Err(CommandError::MustBePositive));
        assert!(is_option(b"withscores", "WITHSCORES"));
    }

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_range(0, -1, 3), Some((0, 2)));
        assert_eq!(normalize_range(-2, 10, 3), Some((1, 2)));
        assert_eq!(normalize_range(2, 1, 3), None);
        assert_eq!(normalize_range(0, -1, 0), None);
    }
}
