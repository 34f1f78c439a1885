//! List commands (push/pop at both ends, ranges, LREM, RPOPLPUSH, BLPOP, BRPOP, SORT)

use super::{
    bulk_or_null, is_option, normalize_range, parse_count, parse_int, Command, CommandContext,
};
use crate::error::{CommandError, CommandResult};
use crate::executor::{parse_timeout_secs, BlockingWait, WaitOutcome};
use crate::protocol::RespValue;
use crate::store::{zset::parse_score, Value};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::debug;

/// Which end of a list an operation works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListEnd {
    Head,
    Tail,
}

impl ListEnd {
    fn pop(self, list: &mut VecDeque<Bytes>) -> Option<Bytes> {
        match self {
            ListEnd::Head => list.pop_front(),
            ListEnd::Tail => list.pop_back(),
        }
    }

    fn push(self, list: &mut VecDeque<Bytes>, value: Bytes) {
        match self {
            ListEnd::Head => list.push_front(value),
            ListEnd::Tail => list.push_back(value),
        }
    }
}

fn push(ctx: &mut CommandContext<'_>, args: &[Bytes], end: ListEnd) -> CommandResult<RespValue> {
    let list = ctx.db().list_or_insert(&args[0])?;
    for value in &args[1..] {
        end.push(list, value.clone());
    }
    let len = list.len();
    ctx.mark_dirty();
    Ok(RespValue::integer(len as i64))
}

/// Pop from the first non-empty list among `keys`, in argument order.
/// Shared by the plain and the blocking pops.
fn pop_first(
    ctx: &mut CommandContext<'_>,
    keys: &[Bytes],
    end: ListEnd,
) -> CommandResult<Option<(Bytes, Bytes)>> {
    for key in keys {
        let db = ctx.db();
        let Some(list) = db.list_mut(key)? else {
            continue;
        };
        if let Some(value) = end.pop(list) {
            db.remove_if_empty(key);
            ctx.mark_dirty();
            return Ok(Some((key.clone(), value)));
        }
    }
    Ok(None)
}

fn pop(ctx: &mut CommandContext<'_>, args: &[Bytes], end: ListEnd) -> CommandResult<RespValue> {
    let key = &args[0];
    let Some(count) = args.get(1).map(|c| parse_count(c)).transpose()? else {
        let popped = pop_first(ctx, std::slice::from_ref(key), end)?;
        return Ok(bulk_or_null(popped.map(|(_, value)| value)));
    };

    let db = ctx.db();
    let Some(list) = db.list_mut(key)? else {
        return Ok(RespValue::NullArray);
    };
    let popped: Vec<Bytes> = std::iter::from_fn(|| end.pop(list)).take(count).collect();
    db.remove_if_empty(key);
    if !popped.is_empty() {
        ctx.mark_dirty();
    }
    Ok(RespValue::bulk_array(popped))
}

fn blocking_pop(ctx: &mut CommandContext<'_>, args: &[Bytes], end: ListEnd) -> CommandResult<RespValue> {
    let (timeout, keys) = args.split_last().ok_or(CommandError::Syntax)?;
    let timeout = parse_timeout_secs(timeout)?;

    match BlockingWait::new(timeout).run(ctx, |ctx| pop_first(ctx, keys, end))? {
        WaitOutcome::Resolved((key, value)) => Ok(RespValue::array(vec![
            RespValue::BulkString(key),
            RespValue::BulkString(value),
        ])),
        outcome => {
            debug!("Blocking pop ended empty: {:?}", outcome);
            Ok(RespValue::NullArray)
        }
    }
}

/// LPUSH command - Prepend one or multiple values to a list
///
/// Syntax: LPUSH key value [value ...]
pub struct LPushCommand;

impl Command for LPushCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        push(ctx, args, ListEnd::Head)
    }

    fn name(&self) -> &'static str {
        "LPUSH"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// RPUSH command - Append one or multiple values to a list
///
/// Syntax: RPUSH key value [value ...]
pub struct RPushCommand;

impl Command for RPushCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        push(ctx, args, ListEnd::Tail)
    }

    fn name(&self) -> &'static str {
        "RPUSH"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// LPOP command - Remove and return the first elements of a list
///
/// Syntax: LPOP key [count]
pub struct LPopCommand;

impl Command for LPopCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        pop(ctx, args, ListEnd::Head)
    }

    fn name(&self) -> &'static str {
        "LPOP"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// RPOP command - Remove and return the last elements of a list
///
/// Syntax: RPOP key [count]
pub struct RPopCommand;

impl Command for RPopCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        pop(ctx, args, ListEnd::Tail)
    }

    fn name(&self) -> &'static str {
        "RPOP"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// BLPOP command - LPOP that waits for one of the lists to get an element
///
/// Syntax: BLPOP key [key ...] timeout
pub struct BLPopCommand;

impl Command for BLPopCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        blocking_pop(ctx, args, ListEnd::Head)
    }

    fn name(&self) -> &'static str {
        "BLPOP"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// BRPOP command - RPOP that waits for one of the lists to get an element
///
/// Syntax: BRPOP key [key ...] timeout
pub struct BRPopCommand;

impl Command for BRPopCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        blocking_pop(ctx, args, ListEnd::Tail)
    }

    fn name(&self) -> &'static str {
        "BRPOP"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// LLEN command - Get the length of a list
///
/// Syntax: LLEN key
pub struct LLenCommand;

impl Command for LLenCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let len = ctx.db().list(&args[0])?.map_or(0, VecDeque::len);
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        "LLEN"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// LRANGE command - Get a range of elements from a list
///
/// Syntax: LRANGE key start stop
pub struct LRangeCommand;

impl Command for LRangeCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let start = parse_int(&args[1])?;
        let stop = parse_int(&args[2])?;

        let Some(list) = ctx.db().list(&args[0])? else {
            return Ok(RespValue::array(vec![]));
        };
        let items: Vec<Bytes> = match normalize_range(start, stop, list.len()) {
            Some((start, stop)) => list.range(start..=stop).cloned().collect(),
            None => Vec::new(),
        };
        Ok(RespValue::bulk_array(items))
    }

    fn name(&self) -> &'static str {
        "LRANGE"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

/// LREM command - Remove occurrences of an element
///
/// Syntax: LREM key count element
///
/// count > 0 removes from the head, count < 0 from the tail, 0 removes all.
pub struct LRemCommand;

impl Command for LRemCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let key = &args[0];
        let count = parse_int(&args[1])?;
        let target = &args[2];
        let limit = match count.unsigned_abs() {
            0 => usize::MAX,
            n => usize::try_from(n).unwrap_or(usize::MAX),
        };

        let db = ctx.db();
        let Some(list) = db.list_mut(key)? else {
            return Ok(RespValue::integer(0));
        };

        let mut removed = 0;
        if count >= 0 {
            let mut index = 0;
            while index < list.len() && removed < limit {
                if list[index] == *target {
                    list.remove(index);
                    removed += 1;
                } else {
                    index += 1;
                }
            }
        } else {
            let mut index = list.len();
            while index > 0 && removed < limit {
                index -= 1;
                if list[index] == *target {
                    list.remove(index);
                    removed += 1;
                }
            }
        }

        db.remove_if_empty(key);
        if removed > 0 {
            ctx.mark_dirty();
        }
        Ok(RespValue::integer(removed as i64))
    }

    fn name(&self) -> &'static str {
        "LREM"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

/// RPOPLPUSH command - Move the last element of a list to the head of another
///
/// Syntax: RPOPLPUSH source destination
pub struct RPopLPushCommand;

impl Command for RPopLPushCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (source, destination) = (&args[0], &args[1]);
        let db = ctx.db();

        // Both types are checked before anything moves
        db.list(destination)?;
        let Some(list) = db.list_mut(source)? else {
            return Ok(RespValue::Null);
        };
        let Some(value) = list.pop_back() else {
            return Ok(RespValue::Null);
        };
        db.remove_if_empty(source);
        db.list_or_insert(destination)?.push_front(value.clone());
        ctx.mark_dirty();
        Ok(RespValue::BulkString(value))
    }

    fn name(&self) -> &'static str {
        "RPOPLPUSH"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// Options of SORT after the key
struct SortOptions {
    by: Option<Bytes>,
    limit: Option<(i64, i64)>,
    descending: bool,
    alpha: bool,
    store: Option<Bytes>,
}

impl SortOptions {
    fn parse(args: &[Bytes]) -> CommandResult<Self> {
        let mut options = SortOptions {
            by: None,
            limit: None,
            descending: false,
            alpha: false,
            store: None,
        };
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            if is_option(arg, "BY") {
                options.by = Some(args.next().ok_or(CommandError::Syntax)?.clone());
            } else if is_option(arg, "LIMIT") {
                let offset = parse_int(args.next().ok_or(CommandError::Syntax)?)?;
                let count = parse_int(args.next().ok_or(CommandError::Syntax)?)?;
                options.limit = Some((offset, count));
            } else if is_option(arg, "ASC") {
                options.descending = false;
            } else if is_option(arg, "DESC") {
                options.descending = true;
            } else if is_option(arg, "ALPHA") {
                options.alpha = true;
            } else if is_option(arg, "STORE") {
                options.store = Some(args.next().ok_or(CommandError::Syntax)?.clone());
            } else {
                return Err(CommandError::Syntax);
            }
        }
        Ok(options)
    }

    /// `BY nosort`, or a BY pattern without `*`, keeps the stored order
    fn skips_sorting(&self) -> bool {
        self.by.as_ref().is_some_and(|by| !by.contains(&b'*'))
    }
}

/// SORT command - Sort the elements of a list, set or sorted set
///
/// Syntax: SORT key [BY pattern] [LIMIT offset count] [ASC|DESC] [ALPHA] [STORE destination]
///
/// A BY pattern containing `*` weighs each element by the string stored at
/// the key obtained by substituting the element for the first `*`.
pub struct SortCommand;

impl Command for SortCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let options = SortOptions::parse(&args[1..])?;
        let db = ctx.db();

        let mut elements: Vec<Bytes> = match db.get(&args[0]) {
            None => Vec::new(),
            Some(Value::List(list)) => list.iter().cloned().collect(),
            Some(Value::Set(set)) => set.iter().cloned().collect(),
            Some(Value::ZSet(zset)) => zset.iter().map(|(member, _)| member.clone()).collect(),
            Some(_) => return Err(CommandError::WrongType),
        };

        if !options.skips_sorting() {
            let mut weighted = Vec::with_capacity(elements.len());
            for element in elements {
                let weight = match &options.by {
                    Some(pattern) => {
                        let key = substitute(pattern, &element);
                        db.string(&key).ok().flatten().cloned()
                    }
                    None => Some(element.clone()),
                };
                weighted.push((weight, element));
            }

            if options.alpha {
                weighted.sort_by(|a, b| a.0.cmp(&b.0));
            } else {
                let mut numeric = Vec::with_capacity(weighted.len());
                for (weight, element) in weighted {
                    let score = match weight {
                        Some(w) => std::str::from_utf8(&w)
                            .ok()
                            .and_then(parse_score)
                            .ok_or(CommandError::SortNotANumber)?,
                        None => 0.0,
                    };
                    numeric.push((score, element));
                }
                numeric.sort_by(|a, b| a.0.total_cmp(&b.0));
                weighted = numeric
                    .into_iter()
                    .map(|(_, element)| (None, element))
                    .collect();
            }
            if options.descending {
                weighted.reverse();
            }
            elements = weighted.into_iter().map(|(_, element)| element).collect();
        }

        if let Some((offset, count)) = options.limit {
            let offset = offset.max(0) as usize;
            let count = if count < 0 { usize::MAX } else { count as usize };
            elements = elements.into_iter().skip(offset).take(count).collect();
        }

        match options.store {
            Some(destination) => {
                let stored = elements.len();
                if elements.is_empty() {
                    db.remove(&destination);
                } else {
                    db.put_value(destination, Value::List(elements.into()));
                }
                ctx.mark_dirty();
                Ok(RespValue::integer(stored as i64))
            }
            None => Ok(RespValue::bulk_array(elements)),
        }
    }

    fn name(&self) -> &'static str {
        "SORT"
    }

    fn min_args(&self) -> usize {
        1
    }
}

/// Replace the first `*` of `pattern` with `element`
fn substitute(pattern: &[u8], element: &[u8]) -> Vec<u8> {
    match pattern.iter().position(|b| *b == b'*') {
        Some(star) => [&pattern[..star], element, &pattern[star + 1..]].concat(),
        None => pattern.to_vec(),
    }
}
