use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, warn};

use geoduel_core::challenge::NoOpReason;
use geoduel_core::{
    Challenge, ChallengeId, ChallengeStatus, ChallengeUpdate, ClientMsg, MatchId, PlayerId,
    UpdateOutcome,
};

use crate::hooks::{MatchEvent, MatchHooks};
use crate::relay::RelayLink;
use crate::store::{DocumentStore, MissedChallengeRecord, PlayerProfile, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Challenger,
    Challenged,
}

/// Client-side driver of the challenge lifecycle. All transitions go
/// through the document's conditional `apply_update`, so calling these in
/// a race with the opponent is safe: the loser observes a no-op outcome.
pub struct ChallengeFlow {
    store: Rc<dyn DocumentStore>,
    relay: Rc<dyn RelayLink>,
    challenge_id: ChallengeId,
    self_id: PlayerId,
    role: Role,
    self_profile: PlayerProfile,
    opponent_profile: PlayerProfile,
    /// Session-scoped at-most-once guard for the missed-challenge record.
    /// Lost on restart, which is acceptable: the record is best effort.
    missed_logged: Cell<bool>,
    last_status: Cell<Option<ChallengeStatus>>,
    hooks: MatchHooks,
}

impl ChallengeFlow {
    /// Issue a fresh challenge document. The caller is the challenger.
    pub fn issue(
        store: &dyn DocumentStore,
        id: ChallengeId,
        challenger_id: PlayerId,
        challenged_id: PlayerId,
    ) -> Result<Challenge, StoreError> {
        let doc = Challenge::create(id, challenger_id, challenged_id);
        store.create(doc.clone())?;
        Ok(doc)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Rc<dyn DocumentStore>,
        relay: Rc<dyn RelayLink>,
        challenge_id: ChallengeId,
        role: Role,
        self_profile: PlayerProfile,
        opponent_profile: PlayerProfile,
        hooks: MatchHooks,
    ) -> Self {
        Self {
            store,
            relay,
            challenge_id,
            self_id: self_profile.id.clone(),
            role,
            self_profile,
            opponent_profile,
            missed_logged: Cell::new(false),
            last_status: Cell::new(None),
            hooks,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Take the challenge and name its relay room. Only the invited
    /// player's client may do this; anyone else's call is dropped here
    /// before touching the store.
    pub fn accept(&self, match_id: MatchId) -> Result<UpdateOutcome, StoreError> {
        if self.role != Role::Challenged {
            debug!(challenge = %self.challenge_id, "accept ignored: not the invited player");
            return Ok(UpdateOutcome::NoOp(NoOpReason::NotChallenged));
        }
        self.store.update(
            &self.challenge_id,
            ChallengeUpdate::Accept {
                player: self.self_id.clone(),
                match_id,
            },
        )
    }

    /// Begin play. Safe to race from both clients: the document keeps the
    /// first `started_at` and the second writer no-ops. On success an
    /// advisory start frame goes out over the relay.
    pub fn start(&self) -> Result<UpdateOutcome, StoreError> {
        let outcome = self.store.update(
            &self.challenge_id,
            ChallengeUpdate::Start {
                player: self.self_id.clone(),
            },
        )?;
        if outcome.status_became() == Some(ChallengeStatus::Active) {
            if let Some(doc) = self.store.read(&self.challenge_id)? {
                if let Some(match_id) = &doc.match_id {
                    self.relay.publish(ClientMsg::StartMatch {
                        match_id: match_id.to_string(),
                        player1_id: doc.challenger_id.to_string(),
                        player2_id: doc.challenged_id.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }

    /// Explicit "cancel challenge" user action.
    pub fn cancel(&self) -> Result<UpdateOutcome, StoreError> {
        let outcome = self.store.update(
            &self.challenge_id,
            ChallengeUpdate::Cancel {
                player: self.self_id.clone(),
            },
        )?;
        if outcome.status_became() == Some(ChallengeStatus::Cancelled) {
            self.log_missed_if_needed(&self.self_id);
        }
        Ok(outcome)
    }

    /// Timer expiry or score target. Idempotent from both clients.
    pub fn complete(&self) -> Result<UpdateOutcome, StoreError> {
        self.store.update(
            &self.challenge_id,
            ChallengeUpdate::Complete {
                player: self.self_id.clone(),
            },
        )
    }

    /// The presence tracker's atomic leave cancelled the challenge; this
    /// client owns the cancellation side effects.
    pub fn note_abandonment_cancel(&self) {
        self.log_missed_if_needed(&self.self_id);
    }

    /// Status-change hooks from the document feed.
    pub fn handle_snapshot(&self, doc: &Challenge) {
        let status = doc.status;
        if self.last_status.get() == Some(status) {
            return;
        }
        self.last_status.set(Some(status));
        (self.hooks.on_status)(status);
        match status {
            ChallengeStatus::Completed => (self.hooks.on_event)(MatchEvent::Completed),
            ChallengeStatus::Cancelled => (self.hooks.on_event)(MatchEvent::Cancelled),
            _ => {}
        }
    }

    fn profile_for(&self, player_id: &PlayerId) -> &PlayerProfile {
        if player_id == &self.self_id {
            &self.self_profile
        } else {
            &self.opponent_profile
        }
    }

    /// At most one missed-challenge record per cancelled challenge whose
    /// invited player never joined. The direction depends on who
    /// cancelled; the two cases are deliberately distinct.
    fn log_missed_if_needed(&self, cancelled_by: &PlayerId) {
        if self.missed_logged.get() {
            return;
        }
        let doc = match self.store.read(&self.challenge_id) {
            Ok(Some(doc)) => doc,
            Ok(None) => return,
            Err(err) => {
                warn!(challenge = %self.challenge_id, %err, "missed-record read failed");
                return;
            }
        };
        if doc.status != ChallengeStatus::Cancelled || doc.challenged_ever_joined {
            return;
        }
        let record = if cancelled_by == &doc.challenged_id {
            // The invited player walked away without ever joining: the
            // issuer's feed shows the missed match.
            let friend = self.profile_for(&doc.challenged_id);
            MissedChallengeRecord {
                owner_id: doc.challenger_id.clone(),
                friend_id: doc.challenged_id.clone(),
                friend_name: friend.name.clone(),
                friend_avatar: friend.avatar.clone(),
                timestamp: self.store.now(),
            }
        } else {
            // The challenger gave up waiting: the absent invitee's feed
            // shows the challenge they missed.
            let friend = self.profile_for(&doc.challenger_id);
            MissedChallengeRecord {
                owner_id: doc.challenged_id.clone(),
                friend_id: doc.challenger_id.clone(),
                friend_name: friend.name.clone(),
                friend_avatar: friend.avatar.clone(),
                timestamp: self.store.now(),
            }
        };
        match self.store.record_missed_challenge(record) {
            Ok(()) => self.missed_logged.set(true),
            Err(err) => {
                warn!(challenge = %self.challenge_id, %err, "missed-record write failed");
            }
        }
    }
}
