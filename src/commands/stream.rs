//! Stream commands (XADD, XLEN, XRANGE, XREVRANGE, XDEL, XTRIM, XREAD)

use super::{arg_str, is_option, now_millis, parse_count, Command, CommandContext};
use crate::error::{CommandError, CommandResult};
use crate::executor::{parse_timeout_millis, BlockingWait, WaitOutcome};
use crate::protocol::RespValue;
use crate::store::{Stream, StreamError, StreamFields, StreamId};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// `[id, [field, value, ...]]` as every stream reply nests entries
fn entry_reply(id: StreamId, fields: &StreamFields) -> RespValue {
    let flat = fields
        .iter()
        .flat_map(|(field, value)| [field.clone(), value.clone()]);
    RespValue::array(vec![
        RespValue::bulk_string(id.to_string()),
        RespValue::bulk_array(flat),
    ])
}

fn entries_reply(entries: Vec<(StreamId, &StreamFields)>) -> RespValue {
    RespValue::array(
        entries
            .into_iter()
            .map(|(id, fields)| entry_reply(id, fields))
            .collect(),
    )
}

fn parse_id(arg: &[u8]) -> CommandResult<StreamId> {
    Ok(arg_str(arg).map_err(|_| StreamError::InvalidId)?.parse()?)
}

/// What a trim keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrimStrategy {
    MaxLen(usize),
    MinId(StreamId),
}

/// `MAXLEN|MINID [=|~] threshold [LIMIT count]`
///
/// `~` trims exactly as `=` does; it only unlocks LIMIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrimSpec {
    strategy: TrimStrategy,
    limit: Option<usize>,
}

impl TrimSpec {
    /// Parse a trim clause at the start of `args`, if there is one.
    /// Returns the clause and the arguments after it.
    fn parse(args: &[Bytes]) -> CommandResult<(Option<TrimSpec>, &[Bytes])> {
        let Some((kind, mut rest)) = args.split_first() else {
            return Ok((None, args));
        };
        let max_len = is_option(kind, "MAXLEN");
        if !max_len && !is_option(kind, "MINID") {
            return Ok((None, args));
        }

        let mut approximate = false;
        if let Some((marker, tail)) = rest.split_first() {
            if marker.as_ref() == b"~" {
                approximate = true;
                rest = tail;
            } else if marker.as_ref() == b"=" {
                rest = tail;
            }
        }

        let (threshold, mut rest) = rest.split_first().ok_or(CommandError::Syntax)?;
        let strategy = if max_len {
            TrimStrategy::MaxLen(parse_count(threshold)?)
        } else {
            TrimStrategy::MinId(parse_id(threshold)?)
        };

        let mut limit = None;
        if let Some((option, tail)) = rest.split_first() {
            if is_option(option, "LIMIT") {
                if !approximate {
                    return Err(StreamError::LimitWithoutApprox.into());
                }
                let (count, tail) = tail.split_first().ok_or(CommandError::Syntax)?;
                limit = Some(parse_count(count)?);
                rest = tail;
            }
        }

        Ok((Some(TrimSpec { strategy, limit }), rest))
    }

    fn apply(&self, stream: &mut Stream) -> usize {
        match self.strategy {
            TrimStrategy::MaxLen(max_len) => stream.trim_len(max_len, self.limit),
            TrimStrategy::MinId(min_id) => stream.trim_min_id(min_id, self.limit),
        }
    }
}

/// XADD command - Append an entry to a stream
///
/// Syntax: XADD key [NOMKSTREAM] [MAXLEN|MINID [=|~] threshold [LIMIT count]] *|id field value [field value ...]
///
/// Replies with the id of the new entry, or null when NOMKSTREAM finds no stream.
pub struct XAddCommand;

impl Command for XAddCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let key = &args[0];
        let mut rest = &args[1..];
        let mut no_mkstream = false;
        if rest.first().is_some_and(|arg| is_option(arg, "NOMKSTREAM")) {
            no_mkstream = true;
            rest = &rest[1..];
        }
        let (trim, rest) = TrimSpec::parse(rest)?;

        let (id_text, pairs) = rest.split_first().ok_or(CommandError::Syntax)?;
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(CommandError::WrongArity("xadd".to_string()));
        }
        let id_text = arg_str(id_text).map_err(|_| StreamError::InvalidId)?;

        let mut fields = StreamFields::new();
        for pair in pairs.chunks_exact(2) {
            fields.insert(pair[0].clone(), pair[1].clone());
        }

        let db = ctx.db();
        let id = match db.stream(key)? {
            Some(stream) => stream.validate_new_id(stream.resolve_id(id_text, now_millis())?)?,
            None if no_mkstream => return Ok(RespValue::Null),
            None => {
                let empty = Stream::new();
                empty.validate_new_id(empty.resolve_id(id_text, now_millis())?)?
            }
        };

        let stream = db.stream_or_insert(key)?;
        stream.add(id, fields)?;
        if let Some(trim) = trim {
            trim.apply(stream);
        }
        ctx.mark_dirty();
        Ok(RespValue::bulk_string(id.to_string()))
    }

    fn name(&self) -> &'static str {
        "XADD"
    }

    fn min_args(&self) -> usize {
        4
    }
}

/// XLEN command - Number of entries in a stream
///
/// Syntax: XLEN key
pub struct XLenCommand;

impl Command for XLenCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let len = ctx.db().stream(&args[0])?.map_or(0, Stream::len);
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        "XLEN"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// XRANGE / XREVRANGE command - Entries between two ids
///
/// Syntax: XRANGE key start end [COUNT count]
///         XREVRANGE key end start [COUNT count]
///
/// `-` and `+` are the smallest and greatest ids, a `(` prefix excludes the bound.
pub struct XRangeCommand {
    reverse: bool,
}

impl XRangeCommand {
    pub fn forward() -> Self {
        XRangeCommand { reverse: false }
    }

    pub fn reverse() -> Self {
        XRangeCommand { reverse: true }
    }
}

impl Command for XRangeCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (low, high) = if self.reverse {
            (&args[2], &args[1])
        } else {
            (&args[1], &args[2])
        };
        let invalid = |_| CommandError::from(StreamError::InvalidId);
        let start = StreamId::parse_range_start(arg_str(low).map_err(invalid)?)?;
        let end = StreamId::parse_range_end(arg_str(high).map_err(invalid)?)?;

        let count = match &args[3..] {
            [] => None,
            [option, count] if is_option(option, "COUNT") => Some(parse_count(count)?),
            _ => return Err(CommandError::Syntax),
        };

        let Some(stream) = ctx.db().stream(&args[0])? else {
            return Ok(RespValue::array(vec![]));
        };
        let entries = if self.reverse {
            stream.rev_range(end, start, count)
        } else {
            stream.range(start, end, count)
        };
        Ok(entries_reply(entries))
    }

    fn name(&self) -> &'static str {
        if self.reverse {
            "XREVRANGE"
        } else {
            "XRANGE"
        }
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(5)
    }
}

/// XDEL command - Delete entries by id
///
/// Syntax: XDEL key id [id ...]
pub struct XDelCommand;

impl Command for XDelCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let ids = args[1..]
            .iter()
            .map(|arg| parse_id(arg))
            .collect::<CommandResult<Vec<_>>>()?;

        let Some(stream) = ctx.db().stream_mut(&args[0])? else {
            return Ok(RespValue::integer(0));
        };
        let deleted = stream.delete(&ids);
        if deleted > 0 {
            ctx.mark_dirty();
        }
        Ok(RespValue::integer(deleted as i64))
    }

    fn name(&self) -> &'static str {
        "XDEL"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// XTRIM command - Evict old entries
///
/// Syntax: XTRIM key MAXLEN|MINID [=|~] threshold [LIMIT count]
pub struct XTrimCommand;

impl Command for XTrimCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (trim, rest) = TrimSpec::parse(&args[1..])?;
        let Some(trim) = trim else {
            return Err(CommandError::Syntax);
        };
        if !rest.is_empty() {
            return Err(CommandError::Syntax);
        }

        let Some(stream) = ctx.db().stream_mut(&args[0])? else {
            return Ok(RespValue::integer(0));
        };
        let evicted = trim.apply(stream);
        if evicted > 0 {
            ctx.mark_dirty();
        }
        Ok(RespValue::integer(evicted as i64))
    }

    fn name(&self) -> &'static str {
        "XTRIM"
    }

    fn min_args(&self) -> usize {
        3
    }
}

/// XREAD command - Read entries newer than the given ids, optionally waiting for them
///
/// Syntax: XREAD [COUNT count] [BLOCK milliseconds] STREAMS key [key ...] id [id ...]
///
/// `$` stands for the last id of the stream when the command starts. With
/// BLOCK the command waits until one of the streams gets a newer entry or
/// the timeout passes; `BLOCK 0` waits forever.
pub struct XReadCommand;

impl XReadCommand {
    /// Entries after each baseline, for the streams that have any
    fn collect(
        ctx: &mut CommandContext<'_>,
        cursors: &[(Bytes, StreamId)],
        count: Option<usize>,
    ) -> CommandResult<Option<RespValue>> {
        let db = ctx.db();
        let mut replies = Vec::new();
        for (key, after) in cursors {
            let Some(stream) = db.stream(key)? else {
                continue;
            };
            let entries = stream.read_after(*after, count);
            if !entries.is_empty() {
                replies.push(RespValue::array(vec![
                    RespValue::BulkString(key.clone()),
                    entries_reply(entries),
                ]));
            }
        }
        Ok((!replies.is_empty()).then(|| RespValue::array(replies)))
    }
}

impl Command for XReadCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let mut count = None;
        let mut block: Option<Duration> = None;
        let mut rest = args;
        loop {
            let (option, tail) = rest.split_first().ok_or(CommandError::Syntax)?;
            if is_option(option, "STREAMS") {
                rest = tail;
                break;
            }
            let (value, tail) = tail.split_first().ok_or(CommandError::Syntax)?;
            if is_option(option, "COUNT") {
                // COUNT 0 means no limit here, unlike XRANGE
                count = Some(parse_count(value)?).filter(|c| *c > 0);
            } else if is_option(option, "BLOCK") {
                block = Some(parse_timeout_millis(value)?);
            } else {
                return Err(CommandError::Syntax);
            }
            rest = tail;
        }

        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(CommandError::UnbalancedXRead);
        }
        let (keys, ids) = rest.split_at(rest.len() / 2);

        let db = ctx.db();
        let mut cursors = Vec::with_capacity(keys.len());
        for (key, id) in keys.iter().zip(ids) {
            let stream = db.stream(key)?;
            let after = if id.as_ref() == b"$" {
                stream.map_or(StreamId::ZERO, Stream::last_id)
            } else {
                parse_id(id)?
            };
            cursors.push((key.clone(), after));
        }

        let Some(timeout) = block else {
            return Ok(Self::collect(ctx, &cursors, count)?.unwrap_or(RespValue::NullArray));
        };

        match BlockingWait::new(timeout).run(ctx, |ctx| Self::collect(ctx, &cursors, count))? {
            WaitOutcome::Resolved(reply) => Ok(reply),
            outcome => {
                debug!("XREAD ended empty: {:?}", outcome);
                Ok(RespValue::NullArray)
            }
        }
    }

    fn name(&self) -> &'static str {
        "XREAD"
    }

    fn min_args(&self) -> usize {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bulk, bulks, run, Fixture};
    use super::*;
    use crate::commands::CommandRegistry;
    use crate::executor::Coordinator;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn entry(id: &str, pairs: &[&str]) -> RespValue {
        RespValue::array(vec![bulk(id), bulks(pairs)])
    }

    #[test]
    fn test_xadd_explicit_ids() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(run(&mut ctx, &["XADD", "s", "5-0", "f", "v"]), bulk("5-0"));
        assert_eq!(run(&mut ctx, &["XADD", "s", "5-*", "f", "v"]), bulk("5-1"));
        assert_eq!(
            run(&mut ctx, &["XADD", "s", "5-1", "f", "v"]),
            RespValue::error("ERR The ID specified in XADD is equal or smaller than the target stream top item")
        );
        assert_eq!(
            run(&mut ctx, &["XADD", "other", "0-0", "f", "v"]),
            RespValue::error("ERR The ID specified in XADD must be greater than 0-0")
        );
        assert_eq!(run(&mut ctx, &["EXISTS", "other"]), RespValue::integer(0));
        assert_eq!(
            run(&mut ctx, &["XADD", "s", "bad", "f", "v"]),
            RespValue::error("ERR Invalid stream ID specified as stream command argument")
        );
        assert_eq!(run(&mut ctx, &["XLEN", "s"]), RespValue::integer(2));
    }

    #[test]
    fn test_xadd_auto_id_is_increasing() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        let first = run(&mut ctx, &["XADD", "s", "*", "f", "v"]);
        let second = run(&mut ctx, &["XADD", "s", "*", "f", "v"]);
        let parse = |reply: &RespValue| -> StreamId {
            std::str::from_utf8(reply.as_bulk_string().unwrap())
                .unwrap()
                .parse()
                .unwrap()
        };
        assert!(parse(&first) < parse(&second));
    }

    #[test]
    fn test_xadd_arguments() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(
            run(&mut ctx, &["XADD", "s", "1-1", "f"]),
            RespValue::error("ERR wrong number of arguments for 'xadd' command")
        );
        assert_eq!(run(&mut ctx, &["XADD", "s", "NOMKSTREAM", "*", "f", "v"]), RespValue::Null);
        assert_eq!(run(&mut ctx, &["EXISTS", "s"]), RespValue::integer(0));
        assert_eq!(
            run(&mut ctx, &["XADD", "s", "MAXLEN", "1", "LIMIT", "1", "*", "f", "v"]),
            RespValue::error("ERR syntax error, LIMIT cannot be used without the special ~ option")
        );
    }

    #[test]
    fn test_xadd_trims() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        for id in ["1-1", "1-2", "1-3"] {
            run(&mut ctx, &["XADD", "s", id, "f", "v"]);
        }
        run(&mut ctx, &["XADD", "s", "MAXLEN", "=", "2", "1-4", "f", "v"]);
        assert_eq!(run(&mut ctx, &["XLEN", "s"]), RespValue::integer(2));

        run(&mut ctx, &["XADD", "s", "MINID", "~", "1-4", "LIMIT", "5", "1-5", "f", "v"]);
        assert_eq!(
            run(&mut ctx, &["XRANGE", "s", "-", "+"]),
            RespValue::array(vec![entry("1-4", &["f", "v"]), entry("1-5", &["f", "v"])])
        );
    }

    #[test]
    fn test_xrange_bounds() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        for id in ["1-1", "2-1", "2-2", "3-1"] {
            run(&mut ctx, &["XADD", "s", id, "k", id]);
        }
        assert_eq!(
            run(&mut ctx, &["XRANGE", "s", "2", "2"]),
            RespValue::array(vec![entry("2-1", &["k", "2-1"]), entry("2-2", &["k", "2-2"])])
        );
        assert_eq!(
            run(&mut ctx, &["XRANGE", "s", "(1-1", "+", "COUNT", "1"]),
            RespValue::array(vec![entry("2-1", &["k", "2-1"])])
        );
        assert_eq!(
            run(&mut ctx, &["XREVRANGE", "s", "+", "(2-2"]),
            RespValue::array(vec![entry("3-1", &["k", "3-1"])])
        );
        assert_eq!(run(&mut ctx, &["XRANGE", "s", "5", "+"]), RespValue::array(vec![]));
        assert_eq!(run(&mut ctx, &["XRANGE", "nope", "-", "+"]), RespValue::array(vec![]));
    }

    #[test]
    fn test_xdel_keeps_empty_stream() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["XADD", "s", "1-1", "f", "v"]);
        assert_eq!(run(&mut ctx, &["XDEL", "s", "1-1", "9-9"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["XLEN", "s"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["TYPE", "s"]), RespValue::simple_string("stream"));
        assert_eq!(
            run(&mut ctx, &["XADD", "s", "1-1", "f", "v"]),
            RespValue::error("ERR The ID specified in XADD is equal or smaller than the target stream top item")
        );
    }

    #[test]
    fn test_xtrim() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        for id in ["1-1", "1-2", "1-3", "1-4"] {
            run(&mut ctx, &["XADD", "s", id, "f", "v"]);
        }
        assert_eq!(run(&mut ctx, &["XTRIM", "s", "MAXLEN", "~", "0", "LIMIT", "1"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["XTRIM", "s", "MINID", "1-4"]), RespValue::integer(2));
        assert_eq!(run(&mut ctx, &["XLEN", "s"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["XTRIM", "s", "LEN", "1"]), RespValue::error("ERR syntax error"));
        assert_eq!(run(&mut ctx, &["XTRIM", "nope", "MAXLEN", "1"]), RespValue::integer(0));
    }

    #[test]
    fn test_xread_immediate() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["XADD", "a", "1-1", "f", "1"]);
        run(&mut ctx, &["XADD", "a", "1-2", "f", "2"]);
        run(&mut ctx, &["XADD", "b", "1-1", "f", "3"]);

        assert_eq!(
            run(&mut ctx, &["XREAD", "COUNT", "1", "STREAMS", "a", "b", "1-1", "0"]),
            RespValue::array(vec![
                RespValue::array(vec![
                    bulk("a"),
                    RespValue::array(vec![entry("1-2", &["f", "2"])]),
                ]),
                RespValue::array(vec![
                    bulk("b"),
                    RespValue::array(vec![entry("1-1", &["f", "3"])]),
                ]),
            ])
        );
        assert_eq!(run(&mut ctx, &["XREAD", "STREAMS", "a", "$"]), RespValue::NullArray);
    }

    #[test]
    fn test_xread_count_zero_is_unlimited() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["XADD", "s", "1-1", "f", "v"]);
        run(&mut ctx, &["XADD", "s", "1-2", "g", "w"]);

        let expected = RespValue::array(vec![RespValue::array(vec![
            bulk("s"),
            RespValue::array(vec![entry("1-1", &["f", "v"]), entry("1-2", &["g", "w"])]),
        ])]);
        assert_eq!(run(&mut ctx, &["XREAD", "COUNT", "0", "STREAMS", "s", "0"]), expected);
        assert_eq!(
            run(&mut ctx, &["XREAD", "COUNT", "0", "BLOCK", "0", "STREAMS", "s", "0"]),
            expected
        );
        assert_eq!(
            run(&mut ctx, &["XRANGE", "s", "-", "+", "COUNT", "0"]),
            RespValue::array(vec![])
        );
    }

    #[test]
    fn test_xread_block_out_of_range() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        let max = i64::MAX.to_string();
        assert_eq!(
            run(&mut ctx, &["XREAD", "BLOCK", &max, "STREAMS", "s", "$"]),
            RespValue::error("ERR timeout is out of range")
        );
    }

    #[test]
    fn test_xread_errors() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(
            run(&mut ctx, &["XREAD", "STREAMS", "a", "b", "0"]),
            RespValue::error(
                "ERR Unbalanced 'xread' list of streams: for each stream key an ID or '$' must be specified."
            )
        );
        assert_eq!(
            run(&mut ctx, &["XREAD", "BLOCK", "-1", "STREAMS", "a", "0"]),
            RespValue::error("ERR timeout is negative")
        );
        assert_eq!(
            run(&mut ctx, &["XREAD", "FOO", "1", "STREAMS", "a", "0"]),
            RespValue::error("ERR syntax error")
        );
    }

    #[test]
    fn test_xread_block_times_out() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        let start = Instant::now();
        assert_eq!(
            run(&mut ctx, &["XREAD", "BLOCK", "150", "STREAMS", "s", "$"]),
            RespValue::NullArray
        );
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_xread_block_wakes_on_xadd() {
        let coordinator = Arc::new(Coordinator::new(16));
        let registry = Arc::new(CommandRegistry::new());
        {
            let mut ctx = CommandContext::new(&coordinator, &registry, 0);
            run(&mut ctx, &["XADD", "s", "1-1", "old", "x"]);
        }

        let writer = {
            let coordinator = Arc::clone(&coordinator);
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                let mut ctx = CommandContext::new(&coordinator, &registry, 0);
                run(&mut ctx, &["XADD", "s", "2-1", "new", "y"]);
            })
        };

        let mut ctx = CommandContext::new(&coordinator, &registry, 0);
        assert_eq!(
            run(&mut ctx, &["XREAD", "BLOCK", "0", "STREAMS", "s", "$"]),
            RespValue::array(vec![RespValue::array(vec![
                bulk("s"),
                RespValue::array(vec![entry("2-1", &["new", "y"])]),
            ])])
        );
        drop(ctx);
        writer.join().unwrap();
    }
}
