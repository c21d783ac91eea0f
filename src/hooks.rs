use std::rc::Rc;

use geoduel_core::ChallengeStatus;

/// Both players' scores as the render layer should show them right now:
/// optimistic until the next document snapshot corrects them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScoreView {
    pub own: u32,
    pub opponent: u32,
}

#[derive(Clone, Debug)]
pub enum MatchEvent {
    /// The opponent guessed an item (normalized form), learned over the
    /// relay ahead of the document.
    OpponentGuessed { item: String },
    /// The countdown hit zero on this client.
    Expired,
    /// One player reached the score target.
    TargetReached,
    Completed,
    Cancelled,
    /// The document store could not be reached; the caller owns the retry.
    StoreUnavailable,
}

/// Callbacks into the render layer. Protocol components never surface
/// errors through these; they only describe state the UI should show.
#[derive(Clone)]
pub struct MatchHooks {
    pub on_status: Rc<dyn Fn(ChallengeStatus)>,
    pub on_opponent_presence: Rc<dyn Fn(bool)>,
    pub on_scores: Rc<dyn Fn(ScoreView)>,
    pub on_remaining: Rc<dyn Fn(i64)>,
    pub on_event: Rc<dyn Fn(MatchEvent)>,
}

impl MatchHooks {
    pub fn empty() -> Self {
        Self {
            on_status: Rc::new(|_| {}),
            on_opponent_presence: Rc::new(|_| {}),
            on_scores: Rc::new(|_| {}),
            on_remaining: Rc::new(|_| {}),
            on_event: Rc::new(|_| {}),
        }
    }
}
