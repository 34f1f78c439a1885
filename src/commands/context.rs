//! Command execution context

use super::CommandRegistry;
use crate::error::{CommandError, CommandResult};
use crate::executor::{CancelHandle, Coordinator, ServerState, StateGuard};
use crate::store::Database;
use std::time::Instant;

/// Context provided to commands during execution
///
/// Holds the server lock for its whole lifetime: one command, one EXEC
/// batch, or one script. Commands reach the key space through [`db`] and
/// report mutations with [`mark_dirty`] so that blocked clients get a
/// chance to re-check once the context is dropped.
///
/// [`db`]: CommandContext::db
/// [`mark_dirty`]: CommandContext::mark_dirty
pub struct CommandContext<'a> {
    guard: StateGuard<'a>,
    coordinator: &'a Coordinator,
    registry: &'a CommandRegistry,
    cancel: Option<&'a CancelHandle>,
    db_index: usize,
    atomic: bool,
    in_script: bool,
    dirty: bool,
}

impl<'a> CommandContext<'a> {
    /// Lock the server and create a context for database `db_index`
    pub fn new(coordinator: &'a Coordinator, registry: &'a CommandRegistry, db_index: usize) -> Self {
        CommandContext {
            guard: coordinator.lock(),
            coordinator,
            registry,
            cancel: None,
            db_index,
            atomic: false,
            in_script: false,
            dirty: false,
        }
    }

    /// Attach the connection's cancellation flag
    pub fn with_cancel(mut self, cancel: &'a CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Mark the context as running a batch that must not block (EXEC)
    pub fn atomic(mut self) -> Self {
        self.atomic = true;
        self
    }

    /// The selected database
    pub fn db(&mut self) -> &mut Database {
        self.guard.database(self.db_index)
    }

    pub fn state(&mut self) -> &mut ServerState {
        &mut self.guard
    }

    pub fn db_index(&self) -> usize {
        self.db_index
    }

    /// Switch the selected database
    pub fn select(&mut self, index: usize) -> CommandResult<()> {
        if index >= self.coordinator.database_count() {
            return Err(CommandError::DbIndexOutOfRange);
        }
        self.db_index = index;
        Ok(())
    }

    pub fn registry(&self) -> &'a CommandRegistry {
        self.registry
    }

    /// Blocking commands degrade to a single attempt when this is set
    pub fn is_atomic(&self) -> bool {
        self.atomic || self.in_script
    }

    pub fn in_script(&self) -> bool {
        self.in_script
    }

    /// Enter or leave script mode; returns the previous setting
    pub fn set_in_script(&mut self, in_script: bool) -> bool {
        std::mem::replace(&mut self.in_script, in_script)
    }

    /// Record that the key space changed
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.coordinator.is_shutting_down() || self.cancel.is_some_and(CancelHandle::is_cancelled)
    }

    /// Release the lock until another command broadcasts
    pub fn wait(&mut self) {
        self.flush_notifications();
        self.coordinator.wait(&mut self.guard);
    }

    /// Release the lock until a broadcast or `deadline`.
    /// Returns true if the deadline passed.
    pub fn wait_until(&mut self, deadline: Instant) -> bool {
        self.flush_notifications();
        self.coordinator.wait_until(&mut self.guard, deadline)
    }

    fn flush_notifications(&mut self) {
        if std::mem::take(&mut self.dirty) {
            self.coordinator.notify_all();
        }
    }
}

impl Drop for CommandContext<'_> {
    fn drop(&mut self) {
        self.flush_notifications();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Value;
    use bytes::Bytes;

    #[test]
    fn test_select_bounds() {
        let coordinator = Coordinator::new(2);
        let registry = CommandRegistry::new();
        let mut ctx = CommandContext::new(&coordinator, &registry, 0);

        assert!(ctx.select(1).is_ok());
        assert_eq!(ctx.db_index(), 1);
        assert_eq!(ctx.select(2), Err(CommandError::DbIndexOutOfRange));
        assert_eq!(ctx.db_index(), 1);
    }

    #[test]
    fn test_databases_are_isolated() {
        let coordinator = Coordinator::new(16);
        let registry = CommandRegistry::new();
        {
            let mut ctx = CommandContext::new(&coordinator, &registry, 0);
            ctx.db().put_value(Bytes::from("k"), Value::string("v"));
        }
        let mut ctx = CommandContext::new(&coordinator, &registry, 1);
        assert!(!ctx.db().exists(b"k"));
        ctx.select(0).unwrap();
        assert!(ctx.db().exists(b"k"));
    }

    #[test]
    fn test_atomic_flags() {
        let coordinator = Coordinator::new(1);
        let registry = CommandRegistry::new();
        let mut ctx = CommandContext::new(&coordinator, &registry, 0);
        assert!(!ctx.is_atomic());
        assert!(!ctx.set_in_script(true));
        assert!(ctx.is_atomic());
        drop(ctx);

        let ctx = CommandContext::new(&coordinator, &registry, 0).atomic();
        assert!(ctx.is_atomic());
        assert!(!ctx.in_script());
    }

    #[test]
    fn test_cancel_is_observed() {
        let coordinator = std::sync::Arc::new(Coordinator::new(1));
        let registry = CommandRegistry::new();
        let handle = CancelHandle::new(std::sync::Arc::clone(&coordinator));
        handle.cancel();

        let ctx = CommandContext::new(&coordinator, &registry, 0).with_cancel(&handle);
        assert!(ctx.is_cancelled());
    }
}
