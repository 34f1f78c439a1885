//! TTL commands (EXPIRE, PEXPIRE, TTL, PTTL, PERSIST)

use super::{parse_int, Command, CommandContext};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::store::Ttl;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Unit of the timeout argument or reply
#[derive(Debug, Clone, Copy)]
enum Unit {
    Seconds,
    Millis,
}

impl Unit {
    fn to_millis(self, amount: i64) -> Option<i64> {
        match self {
            Unit::Seconds => amount.checked_mul(1000),
            Unit::Millis => Some(amount),
        }
    }

    fn render(self, left: Duration) -> i64 {
        match self {
            // Rounded like the real server
            Unit::Seconds => ((left.as_millis() + 500) / 1000) as i64,
            Unit::Millis => left.as_millis() as i64,
        }
    }
}

fn expire(ctx: &mut CommandContext<'_>, args: &[Bytes], unit: Unit, name: &str) -> CommandResult<RespValue> {
    let amount = parse_int(&args[1])?;
    let millis = unit
        .to_millis(amount)
        .ok_or_else(|| CommandError::InvalidExpireTime(name.to_string()))?;

    let now = Instant::now();
    let deadline = if millis <= 0 {
        Some(now)
    } else {
        now.checked_add(Duration::from_millis(millis as u64))
    };
    let deadline = deadline.ok_or_else(|| CommandError::InvalidExpireTime(name.to_string()))?;

    let applied = ctx.db().set_expiry(&args[0], deadline);
    if applied {
        ctx.mark_dirty();
    }
    Ok(RespValue::integer(applied as i64))
}

fn ttl(ctx: &mut CommandContext<'_>, key: &[u8], unit: Unit) -> RespValue {
    RespValue::integer(match ctx.db().ttl(key) {
        Ttl::Missing => -2,
        Ttl::Persistent => -1,
        Ttl::Expires(left) => unit.render(left),
    })
}

/// EXPIRE command - Set a timeout on a key, in seconds
///
/// Syntax: EXPIRE key seconds
pub struct ExpireCommand;

impl Command for ExpireCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        expire(ctx, args, Unit::Seconds, "expire")
    }

    fn name(&self) -> &'static str {
        "EXPIRE"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// PEXPIRE command - Set a timeout on a key, in milliseconds
///
/// Syntax: PEXPIRE key milliseconds
pub struct PExpireCommand;

impl Command for PExpireCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        expire(ctx, args, Unit::Millis, "pexpire")
    }

    fn name(&self) -> &'static str {
        "PEXPIRE"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// TTL command - Get the time to live for a key
///
/// Syntax: TTL key
///
/// Returns:
/// - The TTL in seconds
/// - -1 if the key exists but has no expiration
/// - -2 if the key does not exist
pub struct TtlCommand;

impl Command for TtlCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        Ok(ttl(ctx, &args[0], Unit::Seconds))
    }

    fn name(&self) -> &'static str {
        "TTL"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// PTTL command - Like TTL, in milliseconds
///
/// Syntax: PTTL key
pub struct PTtlCommand;

impl Command for PTtlCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        Ok(ttl(ctx, &args[0], Unit::Millis))
    }

    fn name(&self) -> &'static str {
        "PTTL"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// PERSIST command - Remove the timeout of a key
///
/// Syntax: PERSIST key
pub struct PersistCommand;

impl Command for PersistCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let removed = ctx.db().persist(&args[0]);
        Ok(RespValue::integer(removed as i64))
    }

    fn name(&self) -> &'static str {
        "PERSIST"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{run, Fixture};
    use super::*;

    #[test]
    fn test_expire_and_ttl() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "k", "v"]);

        assert_eq!(run(&mut ctx, &["TTL", "k"]), RespValue::integer(-1));
        assert_eq!(run(&mut ctx, &["EXPIRE", "k", "100"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["TTL", "k"]), RespValue::integer(100));

        let pttl = run(&mut ctx, &["PTTL", "k"]).as_integer().unwrap();
        assert!(pttl > 99_000 && pttl <= 100_000);

        assert_eq!(run(&mut ctx, &["PERSIST", "k"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["PERSIST", "k"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["TTL", "k"]), RespValue::integer(-1));
    }

    #[test]
    fn test_missing_key() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(run(&mut ctx, &["EXPIRE", "nope", "10"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["TTL", "nope"]), RespValue::integer(-2));
        assert_eq!(run(&mut ctx, &["PTTL", "nope"]), RespValue::integer(-2));
    }

    #[test]
    fn test_non_positive_timeout_deletes() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "k", "v"]);
        assert_eq!(run(&mut ctx, &["PEXPIRE", "k", "-5"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["EXISTS", "k"]), RespValue::integer(0));
    }

    #[test]
    fn test_expire_errors() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "k", "v"]);
        assert_eq!(
            run(&mut ctx, &["EXPIRE", "k", "abc"]),
            RespValue::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            run(&mut ctx, &["EXPIRE", "k", "9223372036854775807"]),
            RespValue::error("ERR invalid expire time in 'expire' command")
        );
    }

    #[test]
    fn test_key_disappears_after_expiry() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "k", "v"]);
        run(&mut ctx, &["PEXPIRE", "k", "30"]);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(run(&mut ctx, &["GET", "k"]), RespValue::Null);
        assert_eq!(run(&mut ctx, &["EXISTS", "k"]), RespValue::integer(0));
    }
}
