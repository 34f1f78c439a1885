//! Hash commands (HSET, HSETNX, HGET, HGETALL, HDEL, HEXISTS, HLEN, HINCRBY, HINCRBYFLOAT)

use super::{bulk_or_null, parse_float, parse_int, Command, CommandContext};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::store::zset::{format_score, parse_score};
use bytes::Bytes;
use std::collections::HashMap;

/// HSET command - Set one or more field-value pairs
///
/// Syntax: HSET key field value [field value ...]
///
/// Returns the number of fields that were added.
pub struct HSetCommand;

impl Command for HSetCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        if args[1..].len() % 2 != 0 {
            return Err(CommandError::WrongArity("hset".to_string()));
        }

        let hash = ctx.db().hash_or_insert(&args[0])?;
        let added = args[1..]
            .chunks_exact(2)
            .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
            .count();
        ctx.mark_dirty();
        Ok(RespValue::integer(added as i64))
    }

    fn name(&self) -> &'static str {
        "HSET"
    }

    fn min_args(&self) -> usize {
        3
    }
}

/// HSETNX command - Set a field only if it does not exist yet
///
/// Syntax: HSETNX key field value
pub struct HSetNxCommand;

impl Command for HSetNxCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let db = ctx.db();
        if db.hash(&args[0])?.is_some_and(|hash| hash.contains_key(&args[1])) {
            return Ok(RespValue::integer(0));
        }
        db.hash_or_insert(&args[0])?
            .insert(args[1].clone(), args[2].clone());
        ctx.mark_dirty();
        Ok(RespValue::integer(1))
    }

    fn name(&self) -> &'static str {
        "HSETNX"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

/// HGET command - Get the value of a hash field
///
/// Syntax: HGET key field
pub struct HGetCommand;

impl Command for HGetCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let value = ctx
            .db()
            .hash(&args[0])?
            .and_then(|hash| hash.get(&args[1]))
            .cloned();
        Ok(bulk_or_null(value))
    }

    fn name(&self) -> &'static str {
        "HGET"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// HGETALL command - Get all fields and values of a hash
///
/// Syntax: HGETALL key
///
/// Returns a flat array: field1, value1, field2, value2, ...
pub struct HGetAllCommand;

impl Command for HGetAllCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let Some(hash) = ctx.db().hash(&args[0])? else {
            return Ok(RespValue::array(vec![]));
        };
        let flat = hash
            .iter()
            .flat_map(|(field, value)| [field.clone(), value.clone()]);
        Ok(RespValue::bulk_array(flat))
    }

    fn name(&self) -> &'static str {
        "HGETALL"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// HDEL command - Delete one or more hash fields
///
/// Syntax: HDEL key field [field ...]
pub struct HDelCommand;

impl Command for HDelCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let key = &args[0];
        let db = ctx.db();
        let Some(hash) = db.hash_mut(key)? else {
            return Ok(RespValue::integer(0));
        };
        let deleted = args[1..]
            .iter()
            .filter(|field| hash.remove(*field).is_some())
            .count();
        db.remove_if_empty(key);
        if deleted > 0 {
            ctx.mark_dirty();
        }
        Ok(RespValue::integer(deleted as i64))
    }

    fn name(&self) -> &'static str {
        "HDEL"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// HEXISTS command - Check whether a hash field exists
///
/// Syntax: HEXISTS key field
pub struct HExistsCommand;

impl Command for HExistsCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let found = ctx
            .db()
            .hash(&args[0])?
            .is_some_and(|hash| hash.contains_key(&args[1]));
        Ok(RespValue::integer(found as i64))
    }

    fn name(&self) -> &'static str {
        "HEXISTS"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// HLEN command - Number of fields in a hash
///
/// Syntax: HLEN key
pub struct HLenCommand;

impl Command for HLenCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let len = ctx.db().hash(&args[0])?.map_or(0, HashMap::len);
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        "HLEN"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// HINCRBY command - Increment the integer value of a hash field
///
/// Syntax: HINCRBY key field increment
pub struct HIncrByCommand;

impl Command for HIncrByCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (key, field) = (&args[0], &args[1]);
        let delta = parse_int(&args[2])?;

        let db = ctx.db();
        let current = match db.hash(key)?.and_then(|hash| hash.get(field)) {
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(CommandError::HashValueNotAnInteger)?,
            None => 0,
        };
        let updated = current.checked_add(delta).ok_or(CommandError::Overflow)?;

        db.hash_or_insert(key)?
            .insert(field.clone(), Bytes::from(updated.to_string()));
        ctx.mark_dirty();
        Ok(RespValue::integer(updated))
    }

    fn name(&self) -> &'static str {
        "HINCRBY"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

/// HINCRBYFLOAT command - Increment the float value of a hash field
///
/// Syntax: HINCRBYFLOAT key field increment
pub struct HIncrByFloatCommand;

impl Command for HIncrByFloatCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (key, field) = (&args[0], &args[1]);
        let delta = parse_float(&args[2])?;

        let db = ctx.db();
        let current = match db.hash(key)?.and_then(|hash| hash.get(field)) {
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(parse_score)
                .ok_or(CommandError::HashValueNotAFloat)?,
            None => 0.0,
        };
        let updated = current + delta;
        if !updated.is_finite() {
            return Err(CommandError::NanOrInfinity);
        }

        let rendered = Bytes::from(format_score(updated));
        db.hash_or_insert(key)?.insert(field.clone(), rendered.clone());
        ctx.mark_dirty();
        Ok(RespValue::BulkString(rendered))
    }

    fn name(&self) -> &'static str {
        "HINCRBYFLOAT"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}
