//! Per-connection session
//!
//! Routes incoming requests to the command registry and owns the state that
//! belongs to one client rather than to the key space: the selected
//! database, the MULTI queue and the cancellation flag.

use crate::commands::{CommandContext, CommandRegistry};
use crate::error::{CommandError, CommandResult};
use crate::executor::{CancelHandle, Coordinator};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Commands queued between MULTI and EXEC
#[derive(Debug, Default)]
struct Transaction {
    queued: Vec<Vec<Bytes>>,

    /// Set when a queued command was rejected; EXEC then aborts
    failed: bool,
}

/// Session state for one client connection
pub struct Session {
    coordinator: Arc<Coordinator>,
    registry: Arc<CommandRegistry>,
    cancel: CancelHandle,
    db_index: usize,
    transaction: Option<Transaction>,
    close_requested: bool,
}

impl Session {
    pub fn new(coordinator: Arc<Coordinator>, registry: Arc<CommandRegistry>) -> Self {
        let cancel = CancelHandle::new(Arc::clone(&coordinator));
        Session {
            coordinator,
            registry,
            cancel,
            db_index: 0,
            transaction: None,
            close_requested: false,
        }
    }

    /// Handle that aborts a command this session is blocked in
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn db_index(&self) -> usize {
        self.db_index
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// True once the client sent QUIT
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Dispatch a decoded request
    ///
    /// Requests must be non-empty arrays of bulk strings.
    pub fn dispatch(&mut self, request: RespValue) -> RespValue {
        match request.into_arguments() {
            Some(argv) => self.execute(argv),
            None => {
                warn!("Rejecting request that is not an array of bulk strings");
                RespValue::error("ERR Protocol error: expected an array of bulk strings")
            }
        }
    }

    /// Execute one command line (name followed by its arguments)
    pub fn execute(&mut self, argv: Vec<Bytes>) -> RespValue {
        let Some(name) = argv.first() else {
            return RespValue::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();
        debug!("Dispatching command: {}", name);

        let reply = match name.as_str() {
            "MULTI" => self.multi(&argv),
            "EXEC" => self.exec(&argv),
            "DISCARD" => self.discard(&argv),
            "QUIT" => {
                self.close_requested = true;
                Ok(RespValue::ok())
            }
            _ if self.transaction.is_some() => Ok(self.enqueue(argv)),
            _ => self.run_single(&argv),
        };
        into_reply(reply)
    }

    fn multi(&mut self, argv: &[Bytes]) -> CommandResult<RespValue> {
        expect_no_args("multi", argv)?;
        if self.transaction.is_some() {
            return Err(CommandError::NestedMulti);
        }
        self.transaction = Some(Transaction::default());
        Ok(RespValue::ok())
    }

    fn discard(&mut self, argv: &[Bytes]) -> CommandResult<RespValue> {
        expect_no_args("discard", argv)?;
        match self.transaction.take() {
            Some(tx) => {
                debug!("Discarding {} queued commands", tx.queued.len());
                Ok(RespValue::ok())
            }
            None => Err(CommandError::DiscardWithoutMulti),
        }
    }

    fn enqueue(&mut self, argv: Vec<Bytes>) -> RespValue {
        let Some(tx) = self.transaction.as_mut() else {
            return RespValue::error(CommandError::ExecWithoutMulti.to_string());
        };
        match self.registry.lookup(&argv[0], &argv[1..]) {
            Ok(_) => {
                debug!("Queued command {}", String::from_utf8_lossy(&argv[0]));
                tx.queued.push(argv);
                RespValue::simple_string("QUEUED")
            }
            Err(e) => {
                warn!("Rejected command while queuing: {}", e);
                tx.failed = true;
                RespValue::error(e.to_string())
            }
        }
    }

    fn exec(&mut self, argv: &[Bytes]) -> CommandResult<RespValue> {
        if let Err(e) = expect_no_args("exec", argv) {
            if let Some(tx) = self.transaction.as_mut() {
                tx.failed = true;
            }
            return Err(e);
        }
        let tx = self.transaction.take().ok_or(CommandError::ExecWithoutMulti)?;
        if tx.failed {
            return Err(CommandError::ExecAbort);
        }

        debug!("Executing transaction of {} commands", tx.queued.len());
        let mut ctx = self
            .coordinator
            .context(&self.registry, self.db_index)
            .with_cancel(&self.cancel)
            .atomic();
        let replies = tx
            .queued
            .iter()
            .map(|line| into_reply(run_line(&mut ctx, line)))
            .collect();
        self.db_index = ctx.db_index();
        Ok(RespValue::array(replies))
    }

    fn run_single(&mut self, argv: &[Bytes]) -> CommandResult<RespValue> {
        let mut ctx = self
            .coordinator
            .context(&self.registry, self.db_index)
            .with_cancel(&self.cancel);
        let reply = run_line(&mut ctx, argv);
        self.db_index = ctx.db_index();
        reply
    }
}

/// Look up, arity-check and execute one command line inside `ctx`
fn run_line(ctx: &mut CommandContext<'_>, argv: &[Bytes]) -> CommandResult<RespValue> {
    let command = ctx.registry().lookup(&argv[0], &argv[1..]).inspect_err(|e| {
        if matches!(e, CommandError::UnknownCommand(_)) {
            warn!("{}", e);
        }
    })?;
    command.execute(ctx, &argv[1..])
}

fn expect_no_args(name: &str, argv: &[Bytes]) -> CommandResult<()> {
    if argv.len() != 1 {
        return Err(CommandError::WrongArity(name.to_string()));
    }
    Ok(())
}

fn into_reply(result: CommandResult<RespValue>) -> RespValue {
    result.unwrap_or_else(|e| RespValue::error(e.to_string()))
}
