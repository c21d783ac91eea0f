use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, warn};

use geoduel_core::{Challenge, ChallengeId, ChallengeStatus, ChallengeUpdate, PlayerId, ServerMsg};

use crate::challenge_flow::ChallengeFlow;
use crate::hooks::MatchHooks;
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Flag cleared; the opponent is still attached (or the match already
    /// moved past the setup phase).
    Left,
    /// This leave was the one that emptied the room: the same atomic
    /// update cancelled the challenge, and this client ran the
    /// cancellation side effects.
    CancelledByAbandonment,
}

/// Keeps this player's presence flag true exactly while they sit on the
/// match-setup screen, and mirrors the opponent's presence for the UI.
///
/// Opponent presence has two feeds: relay events arrive first and are
/// advisory; every document snapshot then corrects the view. Cancellation
/// decisions only ever read the document.
pub struct PresenceTracker {
    store: Rc<dyn DocumentStore>,
    flow: Rc<ChallengeFlow>,
    challenge_id: ChallengeId,
    self_id: PlayerId,
    opponent_id: PlayerId,
    opponent_present: Cell<bool>,
    hooks: MatchHooks,
}

impl PresenceTracker {
    pub fn new(
        store: Rc<dyn DocumentStore>,
        flow: Rc<ChallengeFlow>,
        challenge_id: ChallengeId,
        self_id: PlayerId,
        opponent_id: PlayerId,
        hooks: MatchHooks,
    ) -> Self {
        Self {
            store,
            flow,
            challenge_id,
            self_id,
            opponent_id,
            opponent_present: Cell::new(false),
            hooks,
        }
    }

    pub fn opponent_present(&self) -> bool {
        self.opponent_present.get()
    }

    /// Entering the setup screen. A failed store write leaves the remote
    /// flag untouched; the caller retries on its next transition instead
    /// of trusting any local state.
    pub fn enter_setup(&self) -> Result<(), StoreError> {
        self.store
            .update(
                &self.challenge_id,
                ChallengeUpdate::SetPresence {
                    player: self.self_id.clone(),
                    joined: true,
                },
            )
            .map(|_| ())
    }

    /// Leaving the setup screen (navigation, backgrounding, or cancel).
    /// Runs synchronously with the navigation transition; the flag clear
    /// and the potential abandonment cancel are one atomic document
    /// update, so only one of two departing clients becomes the canceller.
    pub fn leave_setup(&self) -> Result<LeaveOutcome, StoreError> {
        let outcome = self.store.update(
            &self.challenge_id,
            ChallengeUpdate::LeaveSetup {
                player: self.self_id.clone(),
            },
        )?;
        if outcome.status_became() == Some(ChallengeStatus::Cancelled) {
            debug!(challenge = %self.challenge_id, "both players gone, challenge cancelled");
            self.flow.note_abandonment_cancel();
            return Ok(LeaveOutcome::CancelledByAbandonment);
        }
        Ok(LeaveOutcome::Left)
    }

    /// Advisory presence from the relay. Low latency, may be lost or
    /// reordered; the next snapshot corrects any lie.
    pub fn handle_relay(&self, msg: &ServerMsg) {
        match msg {
            ServerMsg::PresenceJoined { player_id } => {
                if player_id == self.opponent_id.as_str() {
                    self.set_opponent_present(true);
                } else if player_id != self.self_id.as_str() {
                    warn!(player = %player_id, "presence event for a stranger in our room");
                }
            }
            ServerMsg::PresenceLeft { player_id } => {
                if player_id == self.opponent_id.as_str() {
                    self.set_opponent_present(false);
                }
            }
            _ => {}
        }
    }

    /// Canonical correction from the document feed.
    pub fn handle_snapshot(&self, doc: &Challenge) {
        if let Some(joined) = doc.joined_flag(&self.opponent_id) {
            self.set_opponent_present(joined);
        }
    }

    fn set_opponent_present(&self, present: bool) {
        if self.opponent_present.get() == present {
            return;
        }
        self.opponent_present.set(present);
        (self.hooks.on_opponent_presence)(present);
    }
}
