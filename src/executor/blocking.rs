//! Wait/retry protocol shared by the blocking commands
//!
//! A blocking command hands [`BlockingWait::run`] a non-blocking attempt.
//! The attempt is retried under the server lock after every broadcast until
//! it produces a value, the deadline passes, or the connection goes away.

use crate::commands::{now_millis, CommandContext};
use crate::error::{CommandError, CommandResult};
use std::time::{Duration, Instant};
use tracing::trace;

/// How a blocking invocation ended
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    /// The attempt succeeded, possibly after waiting
    Resolved(T),
    /// The deadline passed first
    TimedOut,
    /// Inside EXEC or a script: one attempt only
    Skipped,
    /// Connection closed or server stopping
    Cancelled,
}

impl<T> WaitOutcome<T> {
    pub fn resolved(self) -> Option<T> {
        match self {
            WaitOutcome::Resolved(value) => Some(value),
            _ => None,
        }
    }
}

/// Deadline of one blocking invocation. No deadline means wait forever.
#[derive(Debug, Clone, Copy)]
pub struct BlockingWait {
    deadline: Option<Instant>,
}

impl BlockingWait {
    /// A zero timeout, or one past what `Instant` can represent, waits forever
    pub fn new(timeout: Duration) -> Self {
        let deadline = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };
        BlockingWait { deadline }
    }

    pub fn run<T, F>(&self, ctx: &mut CommandContext<'_>, mut attempt: F) -> CommandResult<WaitOutcome<T>>
    where
        F: FnMut(&mut CommandContext<'_>) -> CommandResult<Option<T>>,
    {
        loop {
            if let Some(value) = attempt(ctx)? {
                return Ok(WaitOutcome::Resolved(value));
            }
            if ctx.is_atomic() {
                return Ok(WaitOutcome::Skipped);
            }
            if ctx.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }

            match self.deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(WaitOutcome::TimedOut);
                    }
                    ctx.wait_until(deadline);
                }
                None => ctx.wait(),
            }
            trace!("Blocked command woke up, re-checking");
        }
    }
}

/// Timeout in seconds (BLPOP and friends); fractions allowed
pub fn parse_timeout_secs(arg: &[u8]) -> CommandResult<Duration> {
    let secs: f64 = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|s: &f64| s.is_finite())
        .ok_or(CommandError::TimeoutNotAFloat)?;
    if secs < 0.0 {
        return Err(CommandError::NegativeTimeout);
    }
    let millis = secs * 1000.0;
    if millis > max_timeout_millis() as f64 {
        return Err(CommandError::TimeoutOutOfRange);
    }
    Duration::try_from_secs_f64(secs).map_err(|_| CommandError::TimeoutOutOfRange)
}

/// Timeout in whole milliseconds (XREAD BLOCK)
pub fn parse_timeout_millis(arg: &[u8]) -> CommandResult<Duration> {
    let millis: i64 = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::TimeoutNotAnInteger)?;
    if millis < 0 {
        return Err(CommandError::NegativeTimeout);
    }
    let millis = millis as u64;
    if millis > max_timeout_millis() {
        return Err(CommandError::TimeoutOutOfRange);
    }
    Ok(Duration::from_millis(millis))
}

/// Largest timeout whose absolute deadline still fits a signed millisecond clock
fn max_timeout_millis() -> u64 {
    (i64::MAX as u64).saturating_sub(now_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRegistry;
    use crate::executor::{CancelHandle, Coordinator};
    use crate::store::Value;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;

    fn take_key(ctx: &mut CommandContext<'_>) -> CommandResult<Option<Value>> {
        Ok(ctx.db().remove(b"k"))
    }

    #[test]
    fn test_parse_timeouts() {
        assert_eq!(parse_timeout_secs(b"1.5"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_timeout_secs(b"0"), Ok(Duration::ZERO));
        assert_eq!(parse_timeout_secs(b"-1"), Err(CommandError::NegativeTimeout));
        assert_eq!(parse_timeout_secs(b"abc"), Err(CommandError::TimeoutNotAFloat));
        assert_eq!(parse_timeout_millis(b"250"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_timeout_millis(b"1.5"), Err(CommandError::TimeoutNotAnInteger));
        assert_eq!(parse_timeout_millis(b"-5"), Err(CommandError::NegativeTimeout));
    }

    #[test]
    fn test_parse_timeouts_out_of_range() {
        assert_eq!(parse_timeout_secs(b"1e19"), Err(CommandError::TimeoutOutOfRange));
        assert_eq!(
            parse_timeout_secs(b"10000000000000000000"),
            Err(CommandError::TimeoutOutOfRange)
        );
        let max = i64::MAX.to_string();
        assert_eq!(
            parse_timeout_millis(max.as_bytes()),
            Err(CommandError::TimeoutOutOfRange)
        );
        assert!(parse_timeout_secs(b"31536000").is_ok());
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let coordinator = Coordinator::new(1);
        let registry = CommandRegistry::new();

        let mut ctx = CommandContext::new(&coordinator, &registry, 0);
        ctx.db().put_value(Bytes::from("k"), Value::string("v"));
        let outcome = BlockingWait::new(Duration::MAX).run(&mut ctx, take_key).unwrap();
        assert!(matches!(outcome, WaitOutcome::Resolved(Value::String(_))));
        drop(ctx);

        let mut ctx = CommandContext::new(&coordinator, &registry, 0).atomic();
        let outcome = BlockingWait::new(Duration::MAX).run(&mut ctx, take_key).unwrap();
        assert!(matches!(outcome, WaitOutcome::Skipped));
    }

    #[test]
    fn test_resolves_immediately() {
        let coordinator = Coordinator::new(1);
        let registry = CommandRegistry::new();
        let mut ctx = CommandContext::new(&coordinator, &registry, 0);
        ctx.db().put_value(Bytes::from("k"), Value::string("v"));

        let outcome = BlockingWait::new(Duration::ZERO).run(&mut ctx, take_key).unwrap();
        assert!(matches!(outcome, WaitOutcome::Resolved(Value::String(_))));
    }

    #[test]
    fn test_times_out() {
        let coordinator = Coordinator::new(1);
        let registry = CommandRegistry::new();
        let mut ctx = CommandContext::new(&coordinator, &registry, 0);

        let start = Instant::now();
        let outcome = BlockingWait::new(Duration::from_millis(100))
            .run(&mut ctx, take_key)
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_atomic_context_does_not_wait() {
        let coordinator = Coordinator::new(1);
        let registry = CommandRegistry::new();
        let mut ctx = CommandContext::new(&coordinator, &registry, 0).atomic();

        let outcome = BlockingWait::new(Duration::ZERO).run(&mut ctx, take_key).unwrap();
        assert!(matches!(outcome, WaitOutcome::Skipped));
    }

    #[test]
    fn test_woken_by_other_thread() {
        let coordinator = Arc::new(Coordinator::new(1));
        let registry = Arc::new(CommandRegistry::new());

        let writer = {
            let coordinator = Arc::clone(&coordinator);
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                let mut ctx = CommandContext::new(&coordinator, &registry, 0);
                ctx.db().put_value(Bytes::from("k"), Value::string("v"));
                ctx.mark_dirty();
            })
        };

        let mut ctx = CommandContext::new(&coordinator, &registry, 0);
        let start = Instant::now();
        let outcome = BlockingWait::new(Duration::from_secs(10))
            .run(&mut ctx, take_key)
            .unwrap();
        assert!(outcome.resolved().is_some());
        assert!(start.elapsed() < Duration::from_secs(5));
        drop(ctx);
        writer.join().unwrap();
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let coordinator = Arc::new(Coordinator::new(1));
        let registry = CommandRegistry::new();
        let handle = CancelHandle::new(Arc::clone(&coordinator));

        let canceller = {
            let handle = handle.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                handle.cancel();
            })
        };

        let mut ctx = CommandContext::new(&coordinator, &registry, 0).with_cancel(&handle);
        let outcome = BlockingWait::new(Duration::ZERO).run(&mut ctx, take_key).unwrap();
        assert!(matches!(outcome, WaitOutcome::Cancelled));
        drop(ctx);
        canceller.join().unwrap();
    }
}
