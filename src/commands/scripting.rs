//! Lua scripting (EVAL, EVALSHA, SCRIPT)
//!
//! Scripts run on an `mlua` interpreter while the calling context holds the
//! server lock, so a script is atomic with respect to other connections.
//! `redis.call` and `redis.pcall` dispatch through the command registry with
//! the context flagged as in-script; blocking commands degrade to a single
//! attempt there.

use super::{arg_str, is_option, parse_int, Command, CommandContext};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use bytes::Bytes;
use mlua::{Lua, MultiValue, Value};
use sha1::{Digest, Sha1};
use std::cell::RefCell;
use tracing::debug;

/// Hex SHA1 digest that names a script in the cache
pub fn script_digest(source: &str) -> String {
    hex::encode(Sha1::digest(source.as_bytes()))
}

/// Run `source` with `args` = `numkeys key... arg...`
fn run_script(ctx: &mut CommandContext<'_>, source: &str, args: &[Bytes]) -> CommandResult<RespValue> {
    let numkeys = parse_int(&args[0])?;
    if numkeys < 0 {
        return Err(CommandError::NegativeScriptKeys);
    }
    let numkeys = numkeys as usize;
    if numkeys > args.len() - 1 {
        return Err(CommandError::TooManyScriptKeys);
    }
    let (keys, argv) = args[1..].split_at(numkeys);

    let lua = Lua::new();
    install_globals(&lua, keys, argv).map_err(script_error)?;

    let previous = ctx.set_in_script(true);
    let outcome = {
        let cell = RefCell::new(&mut *ctx);
        lua.scope(|scope| {
            let redis: mlua::Table = lua.globals().get("redis")?;
            let call = scope.create_function(|lua, args: MultiValue| {
                let mut ctx = cell
                    .try_borrow_mut()
                    .map_err(|_| mlua::Error::RuntimeError("ERR reentrant redis call".into()))?;
                call_from_script(lua, &mut ctx, args, false)
            })?;
            let pcall = scope.create_function(|lua, args: MultiValue| {
                let mut ctx = cell
                    .try_borrow_mut()
                    .map_err(|_| mlua::Error::RuntimeError("ERR reentrant redis call".into()))?;
                call_from_script(lua, &mut ctx, args, true)
            })?;
            redis.set("call", call)?;
            redis.set("pcall", pcall)?;

            let result: Value = lua.load(source).eval()?;
            lua_to_resp(result)
        })
    };
    ctx.set_in_script(previous);

    outcome.map_err(script_error)
}

/// `KEYS`, `ARGV` and the parts of the `redis` table that need no context
fn install_globals(lua: &Lua, keys: &[Bytes], argv: &[Bytes]) -> mlua::Result<()> {
    let globals = lua.globals();

    for (name, items) in [("KEYS", keys), ("ARGV", argv)] {
        let table = lua.create_table()?;
        for (i, item) in items.iter().enumerate() {
            table.set(i + 1, lua.create_string(item)?)?;
        }
        globals.set(name, table)?;
    }

    let redis = lua.create_table()?;
    redis.set(
        "status_reply",
        lua.create_function(|lua, status: mlua::String| {
            let table = lua.create_table()?;
            table.set("ok", status)?;
            Ok(table)
        })?,
    )?;
    redis.set(
        "error_reply",
        lua.create_function(|lua, message: mlua::String| {
            let table = lua.create_table()?;
            table.set("err", message)?;
            Ok(table)
        })?,
    )?;
    globals.set("redis", redis)?;
    Ok(())
}

/// Body of `redis.call` / `redis.pcall`
fn call_from_script<'lua>(
    lua: &'lua Lua,
    ctx: &mut CommandContext<'_>,
    args: MultiValue<'lua>,
    protected: bool,
) -> mlua::Result<Value<'lua>> {
    let mut argv = Vec::with_capacity(args.len());
    for arg in args {
        let bytes = match arg {
            Value::String(s) => Bytes::copy_from_slice(s.as_bytes()),
            Value::Integer(n) => Bytes::from(n.to_string()),
            Value::Number(n) => Bytes::from(n.to_string()),
            _ => {
                return fail(
                    lua,
                    "ERR Lua redis lib command arguments must be strings or integers",
                    protected,
                )
            }
        };
        argv.push(bytes);
    }
    let Some((name, rest)) = argv.split_first() else {
        return fail(
            lua,
            "ERR Please specify at least one argument for this redis lib call",
            protected,
        );
    };

    let command = match ctx.registry().lookup(name, rest) {
        Ok(command) => command,
        Err(e) => return fail(lua, &e.to_string(), protected),
    };
    if !command.allowed_in_script() {
        return fail(lua, &CommandError::NotAllowedFromScript.to_string(), protected);
    }

    debug!("Script calls {}", command.name());
    match command.execute(ctx, rest) {
        Ok(reply) => resp_to_lua(lua, reply),
        Err(e) => fail(lua, &e.to_string(), protected),
    }
}

/// `redis.call` raises, `redis.pcall` returns an error table
fn fail<'lua>(lua: &'lua Lua, message: &str, protected: bool) -> mlua::Result<Value<'lua>> {
    if protected {
        let table = lua.create_table()?;
        table.set("err", message)?;
        Ok(Value::Table(table))
    } else {
        Err(mlua::Error::RuntimeError(message.to_string()))
    }
}

/// Command reply as the script sees it
fn resp_to_lua(lua: &Lua, reply: RespValue) -> mlua::Result<Value<'_>> {
    Ok(match reply {
        RespValue::SimpleString(status) => {
            let table = lua.create_table()?;
            table.set("ok", status)?;
            Value::Table(table)
        }
        RespValue::Error(message) => {
            let table = lua.create_table()?;
            table.set("err", message)?;
            Value::Table(table)
        }
        RespValue::Integer(n) => Value::Integer(n),
        RespValue::BulkString(bytes) => Value::String(lua.create_string(&bytes)?),
        // Lua tables cannot hold nil, so missing values become false
        RespValue::Null | RespValue::NullArray => Value::Boolean(false),
        RespValue::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.into_iter().enumerate() {
                table.set(i + 1, resp_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

/// Script result as a protocol reply
fn lua_to_resp(value: Value<'_>) -> mlua::Result<RespValue> {
    Ok(match value {
        Value::Nil | Value::Boolean(false) => RespValue::Null,
        Value::Boolean(true) => RespValue::integer(1),
        Value::Integer(n) => RespValue::integer(n),
        // Floats are truncated like the real server does
        Value::Number(n) => RespValue::integer(n as i64),
        Value::String(s) => RespValue::bulk_string(Bytes::copy_from_slice(s.as_bytes())),
        Value::Table(table) => {
            if let Value::String(message) = table.raw_get::<_, Value>("err")? {
                return Ok(RespValue::error(message.to_string_lossy().into_owned()));
            }
            if let Value::String(status) = table.raw_get::<_, Value>("ok")? {
                return Ok(RespValue::simple_string(status.to_string_lossy().into_owned()));
            }
            let mut items = Vec::new();
            for i in 1..=table.raw_len() {
                match table.raw_get::<_, Value>(i)? {
                    Value::Nil => break,
                    item => items.push(lua_to_resp(item)?),
                }
            }
            RespValue::array(items)
        }
        Value::Error(err) => RespValue::error(err.to_string()),
        _ => RespValue::Null,
    })
}

/// Errors raised by `redis.call` keep their text, everything else is a script failure
fn script_error(err: mlua::Error) -> CommandError {
    fn root(err: &mlua::Error) -> &mlua::Error {
        match err {
            mlua::Error::CallbackError { cause, .. } => root(cause),
            other => other,
        }
    }

    match root(&err) {
        mlua::Error::RuntimeError(message) if is_reply_error(message) => {
            CommandError::Raised(message.clone())
        }
        other => CommandError::Script(format!("Error running script: {}", other)),
    }
}

/// Protocol errors start with an upper-case code (`ERR`, `WRONGTYPE`, ...)
fn is_reply_error(message: &str) -> bool {
    message
        .split(' ')
        .next()
        .is_some_and(|code| !code.is_empty() && code.bytes().all(|b| b.is_ascii_uppercase()))
}

/// EVAL command - Run a Lua script
///
/// Syntax: EVAL script numkeys [key ...] [arg ...]
pub struct EvalCommand;

impl Command for EvalCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let source = arg_str(&args[0])?.to_string();
        ctx.state()
            .scripts
            .insert(script_digest(&source), source.clone());
        run_script(ctx, &source, &args[1..])
    }

    fn name(&self) -> &'static str {
        "EVAL"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn allowed_in_script(&self) -> bool {
        false
    }
}

/// EVALSHA command - Run a cached script by its SHA1 digest
///
/// Syntax: EVALSHA sha1 numkeys [key ...] [arg ...]
pub struct EvalShaCommand;

impl Command for EvalShaCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let digest = arg_str(&args[0])?.to_ascii_lowercase();
        let source = ctx
            .state()
            .scripts
            .get(&digest)
            .cloned()
            .ok_or(CommandError::NoScript)?;
        run_script(ctx, &source, &args[1..])
    }

    fn name(&self) -> &'static str {
        "EVALSHA"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn allowed_in_script(&self) -> bool {
        false
    }
}

/// SCRIPT command - Manage the script cache
///
/// Syntax: SCRIPT LOAD script | SCRIPT EXISTS sha1 [sha1 ...] | SCRIPT FLUSH [ASYNC|SYNC]
pub struct ScriptCommand;

impl Command for ScriptCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult<RespValue> {
        let (subcommand, rest) = args.split_first().ok_or(CommandError::Syntax)?;

        if is_option(subcommand, "LOAD") {
            let [source] = rest else {
                return Err(CommandError::WrongArity("script|load".to_string()));
            };
            let source = arg_str(source)?.to_string();
            let digest = script_digest(&source);
            ctx.state().scripts.insert(digest.clone(), source);
            Ok(RespValue::bulk_string(digest))
        } else if is_option(subcommand, "EXISTS") {
            if rest.is_empty() {
                return Err(CommandError::WrongArity("script|exists".to_string()));
            }
            let scripts = &ctx.state().scripts;
            let found = rest
                .iter()
                .map(|digest| {
                    let digest = String::from_utf8_lossy(digest).to_ascii_lowercase();
                    RespValue::integer(scripts.contains_key(&digest) as i64)
                })
                .collect();
            Ok(RespValue::array(found))
        } else if is_option(subcommand, "FLUSH") {
            ctx.state().scripts.clear();
            Ok(RespValue::ok())
        } else {
            Err(CommandError::Syntax)
        }
    }

    fn name(&self) -> &'static str {
        "SCRIPT"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn allowed_in_script(&self) -> bool {
        false
    }
}
