//! Connection and server commands (PING, ECHO, SELECT, DBSIZE, FLUSHDB, FLUSHALL)

use super::{parse_int, Command, CommandContext};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use bytes::Bytes;

/// PING command - Test the connection
///
/// Syntax: PING [message]
pub struct PingCommand;

impl Command for PingCommand {
    fn execute(&self, _ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        Ok(match args.first() {
            Some(message) => RespValue::BulkString(message.clone()),
            None => RespValue::simple_string("PONG"),
        })
    }

    fn name(&self) -> &'static str {
        "PING"
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// ECHO command - Return the given message
///
/// Syntax: ECHO message
pub struct EchoCommand;

impl Command for EchoCommand {
    fn execute(&self, _ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        Ok(RespValue::BulkString(args[0].clone()))
    }

    fn name(&self) -> &'static str {
        "ECHO"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// SELECT command - Change the selected database of the connection
///
/// Syntax: SELECT index
pub struct SelectCommand;

impl Command for SelectCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let index = parse_int(&args[0])?;
        let index = usize::try_from(index).map_err(|_| CommandError::DbIndexOutOfRange)?;
        ctx.select(index)?;
        Ok(RespValue::ok())
    }

    fn name(&self) -> &'static str {
        "SELECT"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// DBSIZE command - Number of keys in the selected database
///
/// Syntax: DBSIZE
pub struct DbSizeCommand;

impl Command for DbSizeCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> CommandResult<RespValue> {
        Ok(RespValue::integer(ctx.db().len() as i64))
    }

    fn name(&self) -> &'static str {
        "DBSIZE"
    }

    fn max_args(&self) -> Option<usize> {
        Some(0)
    }
}

/// FLUSHDB command - Remove all keys from the current database
///
/// Syntax: FLUSHDB [ASYNC|SYNC]
pub struct FlushDbCommand;

impl Command for FlushDbCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> CommandResult<RespValue> {
        ctx.db().clear();
        ctx.mark_dirty();
        Ok(RespValue::ok())
    }

    fn name(&self) -> &'static str {
        "FLUSHDB"
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// FLUSHALL command - Remove all keys from every database
///
/// Syntax: FLUSHALL [ASYNC|SYNC]
pub struct FlushAllCommand;

impl Command for FlushAllCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> CommandResult<RespValue> {
        ctx.state().flush_all();
        ctx.mark_dirty();
        Ok(RespValue::ok())
    }

    fn name(&self) -> &'static str {
        "FLUSHALL"
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}
