//! Server-wide lock, wake-up signal and cancellation

use crate::commands::{CommandContext, CommandRegistry};
use crate::store::Database;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Everything guarded by the server lock
#[derive(Debug, Default)]
pub struct ServerState {
    databases: HashMap<usize, Database>,

    /// Script bodies cached by SHA1 hex digest
    pub scripts: HashMap<String, String>,
}

impl ServerState {
    /// Database at `index`, created on first use
    pub fn database(&mut self, index: usize) -> &mut Database {
        self.databases.entry(index).or_default()
    }

    pub fn flush_all(&mut self) {
        self.databases.clear();
    }
}

pub type StateGuard<'a> = MutexGuard<'a, ServerState>;

/// Shared by every connection of one server instance.
///
/// All key-space access happens while holding `state`. Commands that may
/// unblock a waiter broadcast on `signal` once their mutation is committed;
/// waiters re-check their own predicate on every wake-up.
#[derive(Debug)]
pub struct Coordinator {
    state: Mutex<ServerState>,
    signal: Condvar,
    shutdown: AtomicBool,
    database_count: usize,
}

impl Coordinator {
    pub fn new(database_count: usize) -> Self {
        Coordinator {
            state: Mutex::new(ServerState::default()),
            signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
            database_count,
        }
    }

    /// Lock the server and open a command context on database `db_index`
    pub fn context<'a>(&'a self, registry: &'a CommandRegistry, db_index: usize) -> CommandContext<'a> {
        CommandContext::new(self, registry, db_index)
    }

    /// Number of databases SELECT accepts
    pub fn database_count(&self) -> usize {
        self.database_count
    }

    pub fn lock(&self) -> StateGuard<'_> {
        self.state.lock()
    }

    /// Release the lock until woken, then re-acquire it.
    pub fn wait(&self, guard: &mut StateGuard<'_>) {
        self.signal.wait(guard);
    }

    /// Like [`Coordinator::wait`] but gives up at `deadline`.
    /// Returns true if the deadline passed.
    pub fn wait_until(&self, guard: &mut StateGuard<'_>, deadline: Instant) -> bool {
        self.signal.wait_until(guard, deadline).timed_out()
    }

    /// Wake every waiter. Call with the lock held.
    pub fn notify_all(&self) {
        self.signal.notify_all();
    }

    /// Wake every waiter from outside a command.
    ///
    /// Taking the lock first means a waiter is either already parked on the
    /// condition variable or will see the caller's flag before parking.
    pub fn wake_all(&self) {
        let _guard = self.state.lock();
        self.signal.notify_all();
    }

    /// Make every blocked command return its timeout outcome
    pub fn shutdown(&self) {
        debug!("Coordinator shutting down, waking all waiters");
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Per-connection cancellation flag
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    coordinator: Arc<Coordinator>,
}

impl CancelHandle {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        CancelHandle {
            flag: Arc::new(AtomicBool::new(false)),
            coordinator,
        }
    }

    /// Flag the connection as gone and wake it if it is blocked
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.coordinator.wake_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_databases_are_created_on_demand() {
        let coordinator = Coordinator::new(16);
        let mut state = coordinator.lock();
        state
            .database(3)
            .put_value(bytes::Bytes::from("k"), crate::store::Value::string("v"));
        assert!(state.database(3).exists(b"k"));
        assert!(!state.database(0).exists(b"k"));

        state.flush_all();
        assert!(!state.database(3).exists(b"k"));
    }

    #[test]
    fn test_wait_until_times_out() {
        let coordinator = Coordinator::new(1);
        let mut guard = coordinator.lock();
        let start = Instant::now();
        let timed_out = coordinator.wait_until(&mut guard, start + Duration::from_millis(50));
        assert!(timed_out);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let coordinator = Arc::new(Coordinator::new(1));
        let handle = CancelHandle::new(Arc::clone(&coordinator));

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let handle = handle.clone();
            thread::spawn(move || {
                let mut guard = coordinator.lock();
                while !handle.is_cancelled() {
                    coordinator.wait(&mut guard);
                }
            })
        };

        thread::sleep(Duration::from_millis(50));
        handle.cancel();
        waiter.join().unwrap();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_shutdown_flag() {
        let coordinator = Coordinator::default();
        assert!(!coordinator.is_shutting_down());
        coordinator.shutdown();
        assert!(coordinator.is_shutting_down());
        assert_eq!(coordinator.database_count(), 16);
    }
}
