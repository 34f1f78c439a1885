//! Entry structure: a value plus its optional expiry

use super::value::Value;
use std::time::{Duration, Instant};

/// Represents a single entry in the key space
#[derive(Debug, Clone)]
pub struct Entry {
    /// The value
    pub value: Value,

    /// Optional expiration time (absolute)
    pub expire_at: Option<Instant>,
}

impl Entry {
    /// Create a new entry without expiration
    pub fn new(value: Value) -> Self {
        Entry {
            value,
            expire_at: None,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expire_at.is_some_and(|at| now >= at)
    }

    /// Remaining time to live, `None` without expiration
    pub fn time_to_live(&self) -> Option<Duration> {
        self.expire_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}
