//! Fixed gameplay rules for a duel. None of these are user-configurable.

/// Wall-clock length of a match, measured from the authoritative
/// `started_at` timestamp.
pub const MATCH_DURATION_MS: i64 = 15 * 60 * 1000;

/// Naming every recognized country ends the match early.
pub const SCORE_TARGET: u32 = 196;

/// Disputed territory that is recognized as a guess but never scores, for
/// either player. Kept as a named rule so the exclusion is visible at the
/// scoring call sites instead of buried in arithmetic.
pub const EXCLUDED_TERRITORY: &str = "western sahara";

/// Canonical form of a guessed item: trimmed, lowercased, inner runs of
/// whitespace collapsed to a single space. All dedup sets and the guess
/// log store this form.
pub fn normalize_guess(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
    }
    out
}

/// Whether a normalized item may increment a score.
pub fn is_scorable(normalized: &str) -> bool {
    normalized != EXCLUDED_TERRITORY
}

/// Whether a score ends the match ahead of the timer.
pub fn reaches_target(score: u32) -> bool {
    score >= SCORE_TARGET
}
