//! Sorted set commands (ZADD, ZSCORE, ZCARD, ZCOUNT, ZRANGE, ZREM, ZPOPMIN/ZPOPMAX,
//! BZPOPMIN/BZPOPMAX) and the ZUNION/ZINTER family

use super::{arg_str, is_option, parse_count, parse_int, Command, CommandContext};
use crate::error::{CommandError, CommandResult};
use crate::executor::{parse_timeout_secs, BlockingWait, WaitOutcome};
use crate::protocol::RespValue;
use crate::store::zset::{format_score, intersect, parse_score, union};
use crate::store::{Aggregate, Database, ScoreBound, Value, ZSet};
use bytes::Bytes;
use tracing::debug;

fn score_reply(score: f64) -> RespValue {
    RespValue::bulk_string(format_score(score))
}

/// Flatten (member, score) pairs, with or without the scores
fn members_reply(pairs: Vec<(Bytes, f64)>, with_scores: bool) -> RespValue {
    let mut items = Vec::with_capacity(pairs.len() * if with_scores { 2 } else { 1 });
    for (member, score) in pairs {
        items.push(RespValue::BulkString(member));
        if with_scores {
            items.push(score_reply(score));
        }
    }
    RespValue::array(items)
}

/// Update policy of ZADD
#[derive(Debug, Default)]
struct ZAddOptions {
    only_new: bool,
    only_existing: bool,
    count_changed: bool,
    increment: bool,
}

/// ZADD command - Add members with scores, or update their scores
///
/// Syntax: ZADD key [NX|XX] [CH] [INCR] score member [score member ...]
pub struct ZAddCommand;

impl Command for ZAddCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let key = &args[0];
        let mut options = ZAddOptions::default();
        let mut rest = &args[1..];
        while let Some((arg, tail)) = rest.split_first() {
            if is_option(arg, "NX") {
                options.only_new = true;
            } else if is_option(arg, "XX") {
                options.only_existing = true;
            } else if is_option(arg, "CH") {
                options.count_changed = true;
            } else if is_option(arg, "INCR") {
                options.increment = true;
            } else {
                break;
            }
            rest = tail;
        }

        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(CommandError::Syntax);
        }
        if options.only_new && options.only_existing {
            return Err(CommandError::Syntax);
        }
        if options.increment && rest.len() != 2 {
            return Err(CommandError::Syntax);
        }

        let mut pairs = Vec::with_capacity(rest.len() / 2);
        for pair in rest.chunks_exact(2) {
            let score = parse_score(arg_str(&pair[0]).map_err(|_| CommandError::NotAFloat)?)
                .ok_or(CommandError::NotAFloat)?;
            pairs.push((score, pair[1].clone()));
        }

        let db = ctx.db();
        db.zset(key)?;
        if options.only_existing && !db.exists(key) {
            return Ok(if options.increment {
                RespValue::Null
            } else {
                RespValue::integer(0)
            });
        }

        let zset = db.zset_or_insert(key)?;
        let mut added = 0;
        let mut changed = 0;
        let mut last_score = None;
        let mut produced_nan = false;
        for (score, member) in pairs {
            let current = zset.score(&member);
            if (options.only_new && current.is_some()) || (options.only_existing && current.is_none()) {
                continue;
            }
            let score = match (options.increment, current) {
                (true, Some(current)) => current + score,
                _ => score,
            };
            // Only INCR can get here, and it carries a single pair
            if score.is_nan() {
                produced_nan = true;
                break;
            }
            if current != Some(score) {
                changed += 1;
            }
            if zset.insert(member, score) {
                added += 1;
            }
            last_score = Some(score);
        }
        db.remove_if_empty(key);
        if produced_nan {
            return Err(CommandError::NanOrInfinity);
        }
        ctx.mark_dirty();

        if options.increment {
            return Ok(last_score.map_or(RespValue::Null, score_reply));
        }
        Ok(RespValue::integer(if options.count_changed { changed } else { added }))
    }

    fn name(&self) -> &'static str {
        "ZADD"
    }

    fn min_args(&self) -> usize {
        3
    }
}

/// ZSCORE command - Score of a member
///
/// Syntax: ZSCORE key member
pub struct ZScoreCommand;

impl Command for ZScoreCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let score = ctx.db().zset(&args[0])?.and_then(|zset| zset.score(&args[1]));
        Ok(score.map_or(RespValue::Null, score_reply))
    }

    fn name(&self) -> &'static str {
        "ZSCORE"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// ZCARD command - Number of members
///
/// Syntax: ZCARD key
pub struct ZCardCommand;

impl Command for ZCardCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let len = ctx.db().zset(&args[0])?.map_or(0, ZSet::len);
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        "ZCARD"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// ZCOUNT command - Count members with a score in [min, max]
///
/// Syntax: ZCOUNT key min max
///
/// Bounds accept `-inf`, `+inf` and a `(` prefix for exclusive ends.
pub struct ZCountCommand;

impl Command for ZCountCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let bound = |arg: &Bytes| -> CommandResult<ScoreBound> {
            arg_str(arg)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or(CommandError::MinMaxNotAFloat)
        };
        let (min, max) = (bound(&args[1])?, bound(&args[2])?);

        let count = ctx
            .db()
            .zset(&args[0])?
            .map_or(0, |zset| zset.count_in(min, max));
        Ok(RespValue::integer(count as i64))
    }

    fn name(&self) -> &'static str {
        "ZCOUNT"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

/// ZRANGE command - Members between two ranks
///
/// Syntax: ZRANGE key start stop [REV] [WITHSCORES]
pub struct ZRangeCommand;

impl Command for ZRangeCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let start = parse_int(&args[1])?;
        let stop = parse_int(&args[2])?;
        let mut with_scores = false;
        let mut reverse = false;
        for option in &args[3..] {
            if is_option(option, "WITHSCORES") {
                with_scores = true;
            } else if is_option(option, "REV") {
                reverse = true;
            } else {
                return Err(CommandError::Syntax);
            }
        }

        let pairs = match ctx.db().zset(&args[0])? {
            Some(zset) => zset.range_by_rank(start, stop, reverse),
            None => Vec::new(),
        };
        Ok(members_reply(pairs, with_scores))
    }

    fn name(&self) -> &'static str {
        "ZRANGE"
    }

    fn min_args(&self) -> usize {
        3
    }
}

/// ZREM command - Remove members
///
/// Syntax: ZREM key member [member ...]
pub struct ZRemCommand;

impl Command for ZRemCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let key = &args[0];
        let db = ctx.db();
        let Some(zset) = db.zset_mut(key)? else {
            return Ok(RespValue::integer(0));
        };
        let removed = args[1..].iter().filter(|member| zset.remove(member)).count();
        db.remove_if_empty(key);
        if removed > 0 {
            ctx.mark_dirty();
        }
        Ok(RespValue::integer(removed as i64))
    }

    fn name(&self) -> &'static str {
        "ZREM"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// Which end ZPOP* takes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PopEnd {
    Min,
    Max,
}

impl PopEnd {
    fn pop(self, zset: &mut ZSet) -> Option<(Bytes, f64)> {
        match self {
            PopEnd::Min => zset.pop_min(),
            PopEnd::Max => zset.pop_max(),
        }
    }
}

/// Pop up to `count` members from the sorted set at `key`
fn pop_members(
    ctx: &mut CommandContext<'_>,
    key: &[u8],
    end: PopEnd,
    count: usize,
) -> CommandResult<Vec<(Bytes, f64)>> {
    let db = ctx.db();
    let Some(zset) = db.zset_mut(key)? else {
        return Ok(Vec::new());
    };
    let popped: Vec<(Bytes, f64)> = std::iter::from_fn(|| end.pop(zset)).take(count).collect();
    db.remove_if_empty(key);
    if !popped.is_empty() {
        ctx.mark_dirty();
    }
    Ok(popped)
}

/// ZPOPMIN / ZPOPMAX command - Remove and return the lowest or highest scored members
///
/// Syntax: ZPOPMIN key [count]
pub struct ZPopCommand {
    end: PopEnd,
}

impl ZPopCommand {
    pub fn min() -> Self {
        ZPopCommand { end: PopEnd::Min }
    }

    pub fn max() -> Self {
        ZPopCommand { end: PopEnd::Max }
    }
}

impl Command for ZPopCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let count = match args.get(1) {
            Some(count) => parse_count(count)?,
            None => 1,
        };
        let popped = pop_members(ctx, &args[0], self.end, count)?;
        Ok(members_reply(popped, true))
    }

    fn name(&self) -> &'static str {
        match self.end {
            PopEnd::Min => "ZPOPMIN",
            PopEnd::Max => "ZPOPMAX",
        }
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// BZPOPMIN / BZPOPMAX command - ZPOP that waits for one of the sorted sets to fill
///
/// Syntax: BZPOPMIN key [key ...] timeout
///
/// Replies with `[key, member, score]`, or a null array on timeout.
pub struct BZPopCommand {
    end: PopEnd,
}

impl BZPopCommand {
    pub fn min() -> Self {
        BZPopCommand { end: PopEnd::Min }
    }

    pub fn max() -> Self {
        BZPopCommand { end: PopEnd::Max }
    }
}

impl Command for BZPopCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (timeout, keys) = args.split_last().ok_or(CommandError::Syntax)?;
        let timeout = parse_timeout_secs(timeout)?;
        let end = self.end;

        let outcome = BlockingWait::new(timeout).run(ctx, |ctx| {
            for key in keys {
                if let Some((member, score)) = pop_members(ctx, key, end, 1)?.pop() {
                    return Ok(Some((key.clone(), member, score)));
                }
            }
            Ok(None)
        })?;

        match outcome {
            WaitOutcome::Resolved((key, member, score)) => Ok(RespValue::array(vec![
                RespValue::BulkString(key),
                RespValue::BulkString(member),
                score_reply(score),
            ])),
            outcome => {
                debug!("{} ended empty: {:?}", self.name(), outcome);
                Ok(RespValue::NullArray)
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.end {
            PopEnd::Min => "BZPOPMIN",
            PopEnd::Max => "BZPOPMAX",
        }
    }

    fn min_args(&self) -> usize {
        2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    Union,
    Inter,
}

/// Parsed `numkeys key... [WEIGHTS ...] [AGGREGATE ...] [WITHSCORES]` tail
struct CombineArgs<'a> {
    keys: &'a [Bytes],
    weights: Vec<f64>,
    aggregate: Aggregate,
    with_scores: bool,
}

impl<'a> CombineArgs<'a> {
    fn parse(name: &str, args: &'a [Bytes], allow_with_scores: bool) -> CommandResult<Self> {
        let numkeys = parse_int(&args[0])?;
        if numkeys < 1 {
            return Err(CommandError::NoInputKeys(name.to_ascii_lowercase()));
        }
        let numkeys = numkeys as usize;
        let rest = &args[1..];
        if rest.len() < numkeys {
            return Err(CommandError::Syntax);
        }
        let (keys, mut options) = rest.split_at(numkeys);

        let mut parsed = CombineArgs {
            keys,
            weights: vec![1.0; numkeys],
            aggregate: Aggregate::default(),
            with_scores: false,
        };
        while let Some((option, tail)) = options.split_first() {
            if is_option(option, "WEIGHTS") {
                if tail.len() < numkeys {
                    return Err(CommandError::Syntax);
                }
                for (slot, raw) in parsed.weights.iter_mut().zip(&tail[..numkeys]) {
                    *slot = arg_str(raw)
                        .ok()
                        .and_then(parse_score)
                        .ok_or(CommandError::WeightNotAFloat)?;
                }
                options = &tail[numkeys..];
            } else if is_option(option, "AGGREGATE") {
                let (kind, tail) = tail.split_first().ok_or(CommandError::Syntax)?;
                parsed.aggregate = Aggregate::parse(kind).ok_or(CommandError::Syntax)?;
                options = tail;
            } else if is_option(option, "WITHSCORES") && allow_with_scores {
                parsed.with_scores = true;
                options = tail;
            } else {
                return Err(CommandError::Syntax);
            }
        }
        Ok(parsed)
    }

    /// Load the operands; plain sets score every member 1.0, missing keys are empty
    fn operands(&self, db: &mut Database) -> CommandResult<Vec<ZSet>> {
        let mut operands = Vec::with_capacity(self.keys.len());
        for key in self.keys {
            let operand = match db.get(key) {
                None => ZSet::new(),
                Some(Value::ZSet(zset)) => zset.clone(),
                Some(Value::Set(set)) => ZSet::from_members(set),
                Some(_) => return Err(CommandError::WrongType),
            };
            operands.push(operand);
        }
        Ok(operands)
    }
}

/// ZUNION / ZINTER and their STORE variants
///
/// Syntax: ZUNION numkeys key [key ...] [WEIGHTS weight ...] [AGGREGATE SUM|MIN|MAX] [WITHSCORES]
///         ZUNIONSTORE destination numkeys key [key ...] [WEIGHTS weight ...] [AGGREGATE SUM|MIN|MAX]
pub struct ZCombineCommand {
    combine: Combine,
    store: bool,
}

impl ZCombineCommand {
    pub fn union() -> Self {
        ZCombineCommand { combine: Combine::Union, store: false }
    }

    pub fn inter() -> Self {
        ZCombineCommand { combine: Combine::Inter, store: false }
    }

    pub fn union_store() -> Self {
        ZCombineCommand { combine: Combine::Union, store: true }
    }

    pub fn inter_store() -> Self {
        ZCombineCommand { combine: Combine::Inter, store: true }
    }
}

impl Command for ZCombineCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (destination, args) = if self.store {
            (Some(&args[0]), &args[1..])
        } else {
            (None, args)
        };
        let parsed = CombineArgs::parse(self.name(), args, !self.store)?;

        let db = ctx.db();
        let operands = parsed.operands(db)?;
        let sources = operands.iter().zip(parsed.weights.iter().copied());
        let result = match self.combine {
            Combine::Union => union(sources, parsed.aggregate),
            Combine::Inter => intersect(sources, parsed.aggregate),
        };

        let Some(destination) = destination else {
            let pairs = result.iter().map(|(member, score)| (member.clone(), score)).collect();
            return Ok(members_reply(pairs, parsed.with_scores));
        };

        let len = result.len();
        if result.is_empty() {
            db.remove(destination);
        } else {
            db.put_value(destination.clone(), Value::ZSet(result));
        }
        ctx.mark_dirty();
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        match (self.combine, self.store) {
            (Combine::Union, false) => "ZUNION",
            (Combine::Inter, false) => "ZINTER",
            (Combine::Union, true) => "ZUNIONSTORE",
            (Combine::Inter, true) => "ZINTERSTORE",
        }
    }

    fn min_args(&self) -> usize {
        if self.store {
            3
        } else {
            2
        }
    }
}
