//! Countdown math. The remaining time is always re-derived from the single
//! authoritative `started_at` timestamp, never decremented locally, so two
//! clients converge on the same value no matter when they attached or how
//! far their clocks have drifted from each other.

use crate::challenge::Timestamp;

/// Milliseconds left in a match at `now`. Clamped at zero; a client that
/// attaches after the deadline sees an already-expired match.
pub fn remaining_ms(now: Timestamp, started_at: Timestamp, duration_ms: i64) -> i64 {
    let elapsed = now.saturating_sub(started_at);
    duration_ms.saturating_sub(elapsed).max(0)
}

pub fn is_expired(now: Timestamp, started_at: Timestamp, duration_ms: i64) -> bool {
    remaining_ms(now, started_at, duration_ms) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down_from_start() {
        assert_eq!(remaining_ms(1_000, 1_000, 60_000), 60_000);
        assert_eq!(remaining_ms(31_000, 1_000, 60_000), 30_000);
        assert_eq!(remaining_ms(61_000, 1_000, 60_000), 0);
    }

    #[test]
    fn remaining_clamps_after_deadline() {
        assert_eq!(remaining_ms(500_000, 1_000, 60_000), 0);
        assert!(is_expired(500_000, 1_000, 60_000));
    }

    #[test]
    fn late_attachers_agree_with_early_ones() {
        let started_at = 10_000;
        // One client has been ticking since the start, the other attaches a
        // minute in. At the same instant both compute the same remaining.
        let now = 70_000;
        assert_eq!(
            remaining_ms(now, started_at, 900_000),
            remaining_ms(now, started_at, 900_000)
        );
        assert_eq!(remaining_ms(now, started_at, 900_000), 840_000);
    }
}
