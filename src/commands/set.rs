//! Set commands (SADD, SREM, SMEMBERS, SCARD, SISMEMBER, SMISMEMBER, SPOP, SMOVE)
//! and the SINTER/SUNION/SDIFF family

use super::{bulk_or_null, parse_count, Command, CommandContext};
use crate::error::CommandResult;
use crate::protocol::RespValue;
use crate::store::{Database, Value};
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::HashSet;

/// SADD command - Add one or more members to a set
///
/// Syntax: SADD key member [member ...]
pub struct SAddCommand;

impl Command for SAddCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let set = ctx.db().set_or_insert(&args[0])?;
        let added = args[1..]
            .iter()
            .filter(|member| set.insert((*member).clone()))
            .count();
        ctx.mark_dirty();
        Ok(RespValue::integer(added as i64))
    }

    fn name(&self) -> &'static str {
        "SADD"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// SREM command - Remove one or more members from a set
///
/// Syntax: SREM key member [member ...]
pub struct SRemCommand;

impl Command for SRemCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let key = &args[0];
        let db = ctx.db();
        let Some(set) = db.set_mut(key)? else {
            return Ok(RespValue::integer(0));
        };
        let removed = args[1..].iter().filter(|member| set.remove(*member)).count();
        db.remove_if_empty(key);
        if removed > 0 {
            ctx.mark_dirty();
        }
        Ok(RespValue::integer(removed as i64))
    }

    fn name(&self) -> &'static str {
        "SREM"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// SMEMBERS command - Get all members of a set
///
/// Syntax: SMEMBERS key
pub struct SMembersCommand;

impl Command for SMembersCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let members: Vec<Bytes> = match ctx.db().set(&args[0])? {
            Some(set) => set.iter().cloned().collect(),
            None => Vec::new(),
        };
        Ok(RespValue::bulk_array(members))
    }

    fn name(&self) -> &'static str {
        "SMEMBERS"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// SCARD command - Get the number of members in a set
///
/// Syntax: SCARD key
pub struct SCardCommand;

impl Command for SCardCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let len = ctx.db().set(&args[0])?.map_or(0, HashSet::len);
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        "SCARD"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// SISMEMBER command - Check if a member belongs to a set
///
/// Syntax: SISMEMBER key member
pub struct SIsMemberCommand;

impl Command for SIsMemberCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let found = ctx
            .db()
            .set(&args[0])?
            .is_some_and(|set| set.contains(&args[1]));
        Ok(RespValue::integer(found as i64))
    }

    fn name(&self) -> &'static str {
        "SISMEMBER"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// SMISMEMBER command - SISMEMBER for several members at once
///
/// Syntax: SMISMEMBER key member [member ...]
pub struct SMIsMemberCommand;

impl Command for SMIsMemberCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let set = ctx.db().set(&args[0])?;
        let replies = args[1..]
            .iter()
            .map(|member| {
                let found = set.is_some_and(|set| set.contains(member));
                RespValue::integer(found as i64)
            })
            .collect();
        Ok(RespValue::array(replies))
    }

    fn name(&self) -> &'static str {
        "SMISMEMBER"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// SPOP command - Remove and return random members
///
/// Syntax: SPOP key [count]
pub struct SPopCommand;

impl Command for SPopCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let key = &args[0];
        let count = args.get(1).map(|c| parse_count(c)).transpose()?;

        let db = ctx.db();
        let Some(set) = db.set_mut(key)? else {
            return Ok(match count {
                Some(_) => RespValue::array(vec![]),
                None => RespValue::Null,
            });
        };

        let mut rng = rand::thread_rng();
        let chosen: Vec<Bytes> = set
            .iter()
            .cloned()
            .choose_multiple(&mut rng, count.unwrap_or(1));
        for member in &chosen {
            set.remove(member);
        }
        db.remove_if_empty(key);
        if !chosen.is_empty() {
            ctx.mark_dirty();
        }

        Ok(match count {
            Some(_) => RespValue::bulk_array(chosen),
            None => bulk_or_null(chosen.into_iter().next()),
        })
    }

    fn name(&self) -> &'static str {
        "SPOP"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// SMOVE command - Move a member from one set to another
///
/// Syntax: SMOVE source destination member
pub struct SMoveCommand;

impl Command for SMoveCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (source, destination, member) = (&args[0], &args[1], &args[2]);
        let db = ctx.db();

        db.set(destination)?;
        let Some(set) = db.set_mut(source)? else {
            return Ok(RespValue::integer(0));
        };
        if !set.remove(member) {
            return Ok(RespValue::integer(0));
        }
        db.remove_if_empty(source);
        db.set_or_insert(destination)?.insert(member.clone());
        ctx.mark_dirty();
        Ok(RespValue::integer(1))
    }

    fn name(&self) -> &'static str {
        "SMOVE"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

/// Set algebra shared by SINTER, SUNION and SDIFF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Inter,
    Union,
    Diff,
}

impl SetOp {
    fn names(self) -> (&'static str, &'static str) {
        match self {
            SetOp::Inter => ("SINTER", "SINTERSTORE"),
            SetOp::Union => ("SUNION", "SUNIONSTORE"),
            SetOp::Diff => ("SDIFF", "SDIFFSTORE"),
        }
    }

    /// Combine the sets stored at `keys`; missing keys count as empty sets
    fn apply(self, db: &mut Database, keys: &[Bytes]) -> CommandResult<HashSet<Bytes>> {
        let mut operands = Vec::with_capacity(keys.len());
        for key in keys {
            operands.push(db.set(key)?.cloned().unwrap_or_default());
        }
        let mut operands = operands.into_iter();
        let mut result = operands.next().unwrap_or_default();

        for operand in operands {
            match self {
                SetOp::Inter => result.retain(|member| operand.contains(member)),
                SetOp::Union => result.extend(operand),
                SetOp::Diff => result.retain(|member| !operand.contains(member)),
            }
        }
        Ok(result)
    }
}

/// SINTER / SUNION / SDIFF and their STORE variants
///
/// Syntax: SINTER key [key ...]
///         SINTERSTORE destination key [key ...]
pub struct SetAlgebraCommand {
    op: SetOp,
    store: bool,
}

impl SetAlgebraCommand {
    pub fn read(op: SetOp) -> Self {
        SetAlgebraCommand { op, store: false }
    }

    pub fn store(op: SetOp) -> Self {
        SetAlgebraCommand { op, store: true }
    }
}

impl Command for SetAlgebraCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        if !self.store {
            let result = self.op.apply(ctx.db(), args)?;
            return Ok(RespValue::bulk_array(result));
        }

        let (destination, keys) = (&args[0], &args[1..]);
        let db = ctx.db();
        let result = self.op.apply(db, keys)?;
        let len = result.len();
        if result.is_empty() {
            db.remove(destination);
        } else {
            db.put_value(destination.clone(), Value::Set(result));
        }
        ctx.mark_dirty();
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        let (read, store) = self.op.names();
        if self.store {
            store
        } else {
            read
        }
    }

    fn min_args(&self) -> usize {
        if self.store {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bulks, run, Fixture};
    use super::*;

    /// Set replies come back in hash order
    fn sorted_members(reply: RespValue) -> Vec<Bytes> {
        let mut members: Vec<Bytes> = reply
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item.as_bulk_string().unwrap().clone())
            .collect();
        members.sort();
        members
    }

    fn bytes(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect()
    }

    #[test]
    fn test_sadd_srem_scard() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        assert_eq!(run(&mut ctx, &["SADD", "s", "a", "b", "a"]), RespValue::integer(2));
        assert_eq!(run(&mut ctx, &["SCARD", "s"]), RespValue::integer(2));
        assert_eq!(run(&mut ctx, &["SREM", "s", "a", "zz"]), RespValue::integer(1));
        assert_eq!(sorted_members(run(&mut ctx, &["SMEMBERS", "s"])), bytes(&["b"]));
        assert_eq!(run(&mut ctx, &["SREM", "s", "b"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["EXISTS", "s"]), RespValue::integer(0));
    }

    #[test]
    fn test_membership() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SADD", "s", "a"]);
        assert_eq!(run(&mut ctx, &["SISMEMBER", "s", "a"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["SISMEMBER", "nope", "a"]), RespValue::integer(0));
        assert_eq!(
            run(&mut ctx, &["SMISMEMBER", "s", "a", "b"]),
            RespValue::array(vec![RespValue::integer(1), RespValue::integer(0)])
        );
    }

    #[test]
    fn test_spop() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SADD", "s", "a", "b", "c"]);
        let popped = run(&mut ctx, &["SPOP", "s"]);
        assert!(matches!(popped, RespValue::BulkString(_)));
        assert_eq!(run(&mut ctx, &["SCARD", "s"]), RespValue::integer(2));

        let rest = sorted_members(run(&mut ctx, &["SPOP", "s", "10"]));
        assert_eq!(rest.len(), 2);
        assert_eq!(run(&mut ctx, &["EXISTS", "s"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["SPOP", "s"]), RespValue::Null);
        assert_eq!(run(&mut ctx, &["SPOP", "s", "2"]), bulks(&[]));
    }

    #[test]
    fn test_smove() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SADD", "src", "a"]);
        assert_eq!(run(&mut ctx, &["SMOVE", "src", "dst", "a"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["SMOVE", "src", "dst", "a"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["SMEMBERS", "dst"]), bulks(&["a"]));
        assert_eq!(run(&mut ctx, &["EXISTS", "src"]), RespValue::integer(0));

        run(&mut ctx, &["SET", "str", "x"]);
        assert!(run(&mut ctx, &["SMOVE", "dst", "str", "a"]).is_error());
        assert_eq!(run(&mut ctx, &["SISMEMBER", "dst", "a"]), RespValue::integer(1));
    }

    #[test]
    fn test_set_algebra() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SADD", "a", "1", "2", "3"]);
        run(&mut ctx, &["SADD", "b", "2", "3", "4"]);

        assert_eq!(sorted_members(run(&mut ctx, &["SINTER", "a", "b"])), bytes(&["2", "3"]));
        assert_eq!(
            sorted_members(run(&mut ctx, &["SUNION", "a", "b"])),
            bytes(&["1", "2", "3", "4"])
        );
        assert_eq!(sorted_members(run(&mut ctx, &["SDIFF", "a", "b"])), bytes(&["1"]));
        assert_eq!(run(&mut ctx, &["SINTER", "a", "missing"]), bulks(&[]));
    }

    #[test]
    fn test_store_variants() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SADD", "a", "1", "2"]);
        run(&mut ctx, &["SADD", "b", "2"]);
        assert_eq!(run(&mut ctx, &["SDIFFSTORE", "out", "a", "b"]), RespValue::integer(1));
        assert_eq!(run(&mut ctx, &["SMEMBERS", "out"]), bulks(&["1"]));

        assert_eq!(run(&mut ctx, &["SINTERSTORE", "out", "a", "zz"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["EXISTS", "out"]), RespValue::integer(0));
        assert_eq!(run(&mut ctx, &["GET", "out"]), RespValue::Null);
    }

    #[test]
    fn test_wrong_type_operand() {
        let fixture = Fixture::new();
        let mut ctx = fixture.ctx();
        run(&mut ctx, &["SET", "str", "x"]);
        run(&mut ctx, &["SADD", "s", "a"]);
        assert_eq!(
            run(&mut ctx, &["SUNION", "s", "str"]),
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
        assert_eq!(run(&mut ctx, &["SISMEMBER", "s", "a"]), RespValue::integer(1));
    }
}
