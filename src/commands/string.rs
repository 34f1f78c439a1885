//! String commands (SET, GET, INCR family, SETBIT, GETBIT, BITCOUNT)

use super::{bulk_or_null, is_option, normalize_range, parse_int, Command, CommandContext};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
enum SetCondition {
    Always,
    IfMissing,
    IfExists,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SetExpiry {
    Clear,
    Keep,
    After(Duration),
}

/// Options of SET after key and value
struct SetOptions {
    condition: SetCondition,
    expiry: SetExpiry,
    return_old: bool,
}

impl SetOptions {
    fn parse(options: &[Bytes]) -> CommandResult<Self> {
        let mut parsed = SetOptions {
            condition: SetCondition::Always,
            expiry: SetExpiry::Clear,
            return_old: false,
        };

        let mut options = options.iter();
        while let Some(option) = options.next() {
            if is_option(option, "NX") || is_option(option, "XX") {
                if parsed.condition != SetCondition::Always {
                    return Err(CommandError::Syntax);
                }
                parsed.condition = if is_option(option, "NX") {
                    SetCondition::IfMissing
                } else {
                    SetCondition::IfExists
                };
            } else if is_option(option, "EX") || is_option(option, "PX") {
                if parsed.expiry != SetExpiry::Clear {
                    return Err(CommandError::Syntax);
                }
                let amount = parse_int(options.next().ok_or(CommandError::Syntax)?)?;
                let invalid = || CommandError::InvalidExpireTime("set".to_string());
                if amount <= 0 {
                    return Err(invalid());
                }
                let millis = if is_option(option, "EX") {
                    amount.checked_mul(1000).ok_or_else(invalid)?
                } else {
                    amount
                };
                parsed.expiry = SetExpiry::After(Duration::from_millis(millis as u64));
            } else if is_option(option, "KEEPTTL") {
                if parsed.expiry != SetExpiry::Clear {
                    return Err(CommandError::Syntax);
                }
                parsed.expiry = SetExpiry::Keep;
            } else if is_option(option, "GET") {
                parsed.return_old = true;
            } else {
                return Err(CommandError::Syntax);
            }
        }
        Ok(parsed)
    }
}

/// SET command - Set a key to a value
///
/// Syntax: SET key value [NX|XX] [GET] [EX seconds|PX milliseconds|KEEPTTL]
pub struct SetCommand;

impl Command for SetCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let key = &args[0];
        let options = SetOptions::parse(&args[2..])?;

        let deadline = match options.expiry {
            SetExpiry::After(ttl) => Some(
                Instant::now()
                    .checked_add(ttl)
                    .ok_or_else(|| CommandError::InvalidExpireTime("set".to_string()))?,
            ),
            _ => None,
        };

        let db = ctx.db();
        let old = if options.return_old {
            db.string(key)?.cloned()
        } else {
            None
        };
        let exists = db.exists(key);

        let allowed = match options.condition {
            SetCondition::Always => true,
            SetCondition::IfMissing => !exists,
            SetCondition::IfExists => exists,
        };
        let reply = |ok: bool| {
            if options.return_old {
                bulk_or_null(old.clone())
            } else if ok {
                RespValue::ok()
            } else {
                RespValue::Null
            }
        };
        if !allowed {
            return Ok(reply(false));
        }

        let value = Value::String(args[1].clone());
        match options.expiry {
            SetExpiry::Keep => db.put_value_keep_ttl(key.clone(), value),
            _ => db.put_value(key.clone(), value),
        }
        if let Some(deadline) = deadline {
            db.set_expiry(key, deadline);
        }
        ctx.mark_dirty();
        Ok(reply(true))
    }

    fn name(&self) -> &'static str {
        "SET"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// GET command - Get the value of a key
///
/// Syntax: GET key
pub struct GetCommand;

impl Command for GetCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        Ok(bulk_or_null(ctx.db().string(&args[0])?.cloned()))
    }

    fn name(&self) -> &'static str {
        "GET"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// Add `delta` to the integer stored at `key`, keeping its TTL
fn increment(ctx: &mut CommandContext<'_>, key: &Bytes, delta: i64) -> CommandResult<RespValue> {
    let db = ctx.db();
    let current = match db.string(key)? {
        Some(bytes) => parse_int(bytes)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    db.put_value_keep_ttl(key.clone(), Value::string(next.to_string()));
    ctx.mark_dirty();
    Ok(RespValue::integer(next))
}

/// INCR command - Increment the integer value of a key by 1
///
/// Syntax: INCR key
pub struct IncrCommand;

impl Command for IncrCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        increment(ctx, &args[0], 1)
    }

    fn name(&self) -> &'static str {
        "INCR"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// DECR command - Decrement the integer value of a key by 1
///
/// Syntax: DECR key
pub struct DecrCommand;

impl Command for DecrCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        increment(ctx, &args[0], -1)
    }

    fn name(&self) -> &'static str {
        "DECR"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// INCRBY command - Increment the integer value of a key by the given amount
///
/// Syntax: INCRBY key increment
pub struct IncrByCommand;

impl Command for IncrByCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let delta = parse_int(&args[1])?;
        increment(ctx, &args[0], delta)
    }

    fn name(&self) -> &'static str {
        "INCRBY"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// DECRBY command - Decrement the integer value of a key by the given amount
///
/// Syntax: DECRBY key decrement
pub struct DecrByCommand;

impl Command for DecrByCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let delta = parse_int(&args[1])?
            .checked_neg()
            .ok_or(CommandError::Overflow)?;
        increment(ctx, &args[0], delta)
    }

    fn name(&self) -> &'static str {
        "DECRBY"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// Largest bit offset accepted by SETBIT/GETBIT (512 MB string)
const MAX_BIT_OFFSET: u64 = 4 * 1024 * 1024 * 1024 - 1;

fn parse_bit_offset(arg: &[u8]) -> CommandResult<u64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|offset| *offset <= MAX_BIT_OFFSET)
        .ok_or(CommandError::BitOffset)
}

/// SETBIT command - Set or clear one bit of a string, growing it as needed
///
/// Syntax: SETBIT key offset 0|1
pub struct SetBitCommand;

impl Command for SetBitCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let offset = parse_bit_offset(&args[1])?;
        let on = match args[2].as_ref() {
            b"1" => true,
            b"0" => false,
            _ => return Err(CommandError::BitValue),
        };

        let db = ctx.db();
        let mut bytes = BytesMut::from(db.string(&args[0])?.map_or(&[][..], |b| b.as_ref()));
        let index = (offset / 8) as usize;
        let mask = 0x80u8 >> (offset % 8);
        if bytes.len() <= index {
            bytes.resize(index + 1, 0);
        }

        let previous = bytes[index] & mask != 0;
        if on {
            bytes[index] |= mask;
        } else {
            bytes[index] &= !mask;
        }
        db.put_value_keep_ttl(args[0].clone(), Value::String(bytes.freeze()));
        ctx.mark_dirty();
        Ok(RespValue::integer(previous as i64))
    }

    fn name(&self) -> &'static str {
        "SETBIT"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

/// GETBIT command - Read one bit of a string
///
/// Syntax: GETBIT key offset
pub struct GetBitCommand;

impl Command for GetBitCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let offset = parse_bit_offset(&args[1])?;
        let bit = ctx
            .db()
            .string(&args[0])?
            .and_then(|bytes| bytes.get((offset / 8) as usize).copied())
            .map_or(0, |byte| (byte & (0x80u8 >> (offset % 8)) != 0) as i64);
        Ok(RespValue::integer(bit))
    }

    fn name(&self) -> &'static str {
        "GETBIT"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// BITCOUNT command - Count set bits, optionally within a byte range
///
/// Syntax: BITCOUNT key [start end]
pub struct BitCountCommand;

impl Command for BitCountCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let range = match args.len() {
            1 => None,
            3 => Some((parse_int(&args[1])?, parse_int(&args[2])?)),
            _ => return Err(CommandError::Syntax),
        };

        let Some(bytes) = ctx.db().string(&args[0])? else {
            return Ok(RespValue::integer(0));
        };
        let selected = match range {
            None => &bytes[..],
            Some((start, end)) => match normalize_range(start, end, bytes.len()) {
                Some((start, end)) => &bytes[start..=end],
                None => &[][..],
            },
        };
        let count: u32 = selected.iter().map(|byte| byte.count_ones()).sum();
        Ok(RespValue::integer(count as i64))
    }

    fn name(&self) -> &'static str {
        "BITCOUNT"
    }

    fn min_args(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bulk, run, Fixture};
    use super::*;

    #[test]
    fn test_set_get() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(run(&mut ctx, &["SET", "k", "v"]), RespValue::ok());
        assert_eq!(run(&mut ctx, &["GET", "k"]), bulk("v"));
        assert_eq!(run(&mut ctx, &["GET", "nope"]), RespValue::Null);
    }

    #[test]
    fn test_set_conditions() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(run(&mut ctx, &["SET", "k", "1", "XX"]), RespValue::Null);
        assert_eq!(run(&mut ctx, &["SET", "k", "1", "NX"]), RespValue::ok());
        assert_eq!(run(&mut ctx, &["SET", "k", "2", "NX"]), RespValue::Null);
        assert_eq!(run(&mut ctx, &["SET", "k", "3", "XX", "GET"]), bulk("1"));
        assert_eq!(run(&mut ctx, &["GET", "k"]), bulk("3"));
        assert_eq!(
            run(&mut ctx, &["SET", "k", "v", "NX", "XX"]),
            RespValue::error("ERR syntax error")
        );
    }

    #[test]
    fn test_set_expiry_options() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "k", "v", "EX", "100"]);
        assert_eq!(run(&mut ctx, &["TTL", "k"]), RespValue::integer(100));

        run(&mut ctx, &["SET", "k", "w", "KEEPTTL"]);
        assert_eq!(run(&mut ctx, &["TTL", "k"]), RespValue::integer(100));

        run(&mut ctx, &["SET", "k", "x"]);
        assert_eq!(run(&mut ctx, &["TTL", "k"]), RespValue::integer(-1));

        assert_eq!(
            run(&mut ctx, &["SET", "k", "v", "EX", "0"]),
            RespValue::error("ERR invalid expire time in 'set' command")
        );
        assert_eq!(
            run(&mut ctx, &["SET", "k", "v", "EX", "10", "KEEPTTL"]),
            RespValue::error("ERR syntax error")
        );
        // Failed option parsing leaves the old value
        assert_eq!(run(&mut ctx, &["GET", "k"]), bulk("x"));
    }

    #[test]
    fn test_incr_family() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(run(&mut ctx, &["INCR", "n"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["INCRBY", "n", "10"]), RespValue::integer(11));
        assert_eq!(run(&mut ctx, &["DECR", "n"]), RespValue::integer(10));
        assert_eq!(run(&mut ctx, &["DECRBY", "n", "4"]), RespValue::integer(6));
        assert_eq!(run(&mut ctx, &["GET", "n"]), bulk("6"));
    }

    #[test]
    fn test_incr_errors() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "s", "abc"]);
        assert_eq!(
            run(&mut ctx, &["INCR", "s"]),
            RespValue::error("ERR value is not an integer or out of range")
        );

        run(&mut ctx, &["SET", "max", "9223372036854775807"]);
        assert_eq!(
            run(&mut ctx, &["INCR", "max"]),
            RespValue::error("ERR increment or decrement would overflow")
        );

        run(&mut ctx, &["RPUSH", "l", "a"]);
        assert_eq!(
            run(&mut ctx, &["INCR", "l"]),
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
    }

    #[test]
    fn test_incr_keeps_ttl() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "n", "1", "EX", "100"]);
        run(&mut ctx, &["INCR", "n"]);
        assert_eq!(run(&mut ctx, &["TTL", "n"]), RespValue::integer(100));
    }

    #[test]
    fn test_bits() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(run(&mut ctx, &["SETBIT", "b", "7", "1"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["SETBIT", "b", "7", "0"]), RespValue::integer(1));
        run(&mut ctx, &["SETBIT", "b", "1", "1"]);
        run(&mut ctx, &["SETBIT", "b", "9", "1"]);

        assert_eq!(run(&mut ctx, &["GET", "b"]), bulk("@@"));
        assert_eq!(run(&mut ctx, &["GETBIT", "b", "1"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["GETBIT", "b", "100"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["BITCOUNT", "b"]), RespValue::integer(2));
        assert_eq!(run(&mut ctx, &["BITCOUNT", "b", "1", "-1"]), RespValue::integer(1));

        assert_eq!(
            run(&mut ctx, &["SETBIT", "b", "1", "2"]),
            RespValue::error("ERR bit is not an integer or out of range")
        );
        assert_eq!(
            run(&mut ctx, &["GETBIT", "b", "-1"]),
            RespValue::error("ERR bit offset is not an integer or out of range")
        );
    }
}
