use std::cell::Cell;

use tracing::warn;

use geoduel_core::timer::remaining_ms;
use geoduel_core::Timestamp;

use crate::hooks::{MatchEvent, MatchHooks};

/// Countdown for one match. Every tick re-derives the remaining time from
/// the document's `started_at`, so clients converge regardless of when
/// they attached or how their clocks drift.
///
/// Until `started_at` has propagated, a local fallback deadline seeded at
/// full duration stands in. When the authoritative timestamp lands, the
/// displayed value may jump forward or backward once — that is specified
/// behavior, not smoothed away.
pub struct MatchTimer {
    duration_ms: i64,
    started_at: Cell<Option<Timestamp>>,
    fallback_deadline: Cell<Option<i64>>,
    expired_fired: Cell<bool>,
    hooks: MatchHooks,
}

impl MatchTimer {
    pub fn new(duration_ms: i64, hooks: MatchHooks) -> Self {
        Self {
            duration_ms,
            started_at: Cell::new(None),
            fallback_deadline: Cell::new(None),
            expired_fired: Cell::new(false),
            hooks,
        }
    }

    /// Feed the authoritative start timestamp from a document snapshot.
    /// First value wins; the field is immutable in the document, so a
    /// different later value can only be a bug upstream.
    pub fn observe_started_at(&self, started_at: Timestamp) {
        match self.started_at.get() {
            None => self.started_at.set(Some(started_at)),
            Some(existing) if existing != started_at => {
                warn!(existing, started_at, "conflicting started_at ignored");
            }
            Some(_) => {}
        }
    }

    pub fn has_authoritative_start(&self) -> bool {
        self.started_at.get().is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expired_fired.get()
    }

    /// Recompute the remaining time at `now` (this client's clock, in ms).
    /// Fires `MatchEvent::Expired` exactly once when the countdown hits
    /// zero, no matter how many ticks observe it.
    pub fn tick(&self, now: i64) -> i64 {
        let remaining = match self.started_at.get() {
            Some(started_at) => remaining_ms(now, started_at, self.duration_ms),
            None => {
                let deadline = match self.fallback_deadline.get() {
                    Some(deadline) => deadline,
                    None => {
                        let deadline = now + self.duration_ms;
                        self.fallback_deadline.set(Some(deadline));
                        deadline
                    }
                };
                deadline.saturating_sub(now).max(0)
            }
        };
        (self.hooks.on_remaining)(remaining);
        if remaining == 0 && !self.expired_fired.get() {
            self.expired_fired.set(true);
            (self.hooks.on_event)(MatchEvent::Expired);
        }
        remaining
    }
}
