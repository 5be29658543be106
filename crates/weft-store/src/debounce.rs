//! Flush scheduling
//!
//! Pure deadline arithmetic for the debounced snapshot flush: a write
//! becomes due `debounce` after the most recent update, but never later
//! than `ceiling` after the first unflushed update, so a room updating
//! faster than the debounce window still hits disk.

use std::time::{Duration, Instant};

/// Deadline state for one room's pending flush
#[derive(Debug, Clone)]
pub struct FlushSchedule {
    debounce: Duration,
    ceiling: Duration,
    last_update: Option<Instant>,
    first_dirty: Option<Instant>,
}

impl FlushSchedule {
    /// Create a schedule with the given debounce window and ceiling
    pub fn new(debounce: Duration, ceiling: Duration) -> Self {
        Self {
            debounce,
            ceiling: ceiling.max(debounce),
            last_update: None,
            first_dirty: None,
        }
    }

    /// Record an accepted update at `now`
    pub fn mark_dirty(&mut self, now: Instant) {
        self.last_update = Some(now);
        self.first_dirty.get_or_insert(now);
    }

    /// Record a completed flush; the schedule goes quiet
    pub fn flushed(&mut self) {
        self.last_update = None;
        self.first_dirty = None;
    }

    /// Whether unflushed updates exist
    pub fn is_dirty(&self) -> bool {
        self.first_dirty.is_some()
    }

    /// When the next flush is due, if anything is dirty
    pub fn deadline(&self) -> Option<Instant> {
        let last = self.last_update?;
        let first = self.first_dirty?;
        Some((last + self.debounce).min(first + self.ceiling))
    }
}
