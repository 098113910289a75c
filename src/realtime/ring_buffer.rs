//! A per-user replay buffer bounded by both count and age (`SPEC_FULL.md` §4.5).

use super::event::LifecycleEvent;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Bounded ring buffer of durable (non-transient) lifecycle events for one
/// user. Eviction is the only mutation besides append.
pub struct RingBuffer {
    events: VecDeque<LifecycleEvent>,
    max_count: usize,
    max_age: Duration,
}

impl RingBuffer {
    #[must_use]
    pub fn new(max_count: usize, max_age: Duration) -> Self {
        Self { events: VecDeque::with_capacity(max_count), max_count, max_age }
    }

    /// Append an event, evicting the oldest if over capacity. Non-replayable
    /// kinds (progress) are never buffered, per §4.5.
    pub fn push(&mut self, event: LifecycleEvent) {
        if !event.kind.is_replayable() {
            return;
        }
        self.evict_expired();
        if self.events.len() >= self.max_count {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn evict_expired(&mut self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.max_age).unwrap_or_default();
        while self.events.front().is_some_and(|e| e.timestamp < cutoff) {
            self.events.pop_front();
        }
    }

    /// Events with timestamp strictly greater than `after`, in order. `after
    /// = None` replays everything currently buffered. The strict
    /// greater-than is the open-question decision recorded in `SPEC_FULL.md`
    /// §9 and `DESIGN.md`.
    #[must_use]
    pub fn since(&self, after: Option<DateTime<Utc>>) -> Vec<LifecycleEvent> {
        match after {
            None => self.events.iter().cloned().collect(),
            Some(after) => self.events.iter().filter(|e| e.timestamp > after).cloned().collect(),
        }
    }
}
