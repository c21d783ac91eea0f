//! The authoritative challenge document and its transition function.
//!
//! Every store backend applies [`ChallengeUpdate`]s by running
//! [`apply_update`] inside its own read-modify-write, which makes the
//! document the single serialization point for both clients. Transitions
//! attempted from an invalid state are quiet no-ops: with two independent
//! clients racing on an eventually-consistent document, stale attempts are
//! expected traffic, not errors.

use serde::{Deserialize, Serialize};

use crate::ids::{ChallengeId, MatchId, PlayerId};
use crate::rules;

/// Milliseconds since the Unix epoch, assigned by the store's server clock.
pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Accepted,
    Active,
    Completed,
    Cancelled,
}

impl ChallengeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChallengeStatus::Completed | ChallengeStatus::Cancelled)
    }

    /// States from which a cancellation may still happen.
    pub fn is_cancellable(self) -> bool {
        matches!(self, ChallengeStatus::Pending | ChallengeStatus::Accepted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Accepted => "accepted",
            ChallengeStatus::Active => "active",
            ChallengeStatus::Completed => "completed",
            ChallengeStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub player_id: PlayerId,
    pub score: u32,
}

/// Exactly two score entries, one per participant, for the lifetime of the
/// challenge. Order is stable (challenger first) because it is externally
/// observable; lookup is keyed by player id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBoard {
    entries: [ScoreEntry; 2],
}

impl ScoreBoard {
    pub fn new(challenger_id: PlayerId, challenged_id: PlayerId) -> Self {
        Self {
            entries: [
                ScoreEntry {
                    player_id: challenger_id,
                    score: 0,
                },
                ScoreEntry {
                    player_id: challenged_id,
                    score: 0,
                },
            ],
        }
    }

    pub fn score(&self, player_id: &PlayerId) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| &entry.player_id == player_id)
            .map(|entry| entry.score)
    }

    pub fn entries(&self) -> &[ScoreEntry; 2] {
        &self.entries
    }

    pub fn max_score(&self) -> u32 {
        self.entries.iter().map(|entry| entry.score).max().unwrap_or(0)
    }

    fn bump(&mut self, player_id: &PlayerId) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| &entry.player_id == player_id)
        else {
            return false;
        };
        entry.score = entry.score.saturating_add(1);
        true
    }
}

/// One audited guess. Items are stored in normalized form. The log is the
/// per-player dedup basis and a replay aid; scoring never reads it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessRecord {
    pub player_id: PlayerId,
    pub item: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub challenger_id: PlayerId,
    pub challenged_id: PlayerId,
    pub status: ChallengeStatus,
    pub challenger_joined: bool,
    pub challenged_joined: bool,
    /// Latched true the first time the invited player shows up. The live
    /// flag cannot express "never joined", which the missed-challenge rule
    /// needs at cancellation time.
    pub challenged_ever_joined: bool,
    pub match_id: Option<MatchId>,
    pub started_at: Option<Timestamp>,
    pub score_list: ScoreBoard,
    pub guess_log: Vec<GuessRecord>,
}

impl Challenge {
    /// A freshly issued challenge: the challenger is already sitting on the
    /// setup screen, the invited player is not.
    pub fn create(id: ChallengeId, challenger_id: PlayerId, challenged_id: PlayerId) -> Self {
        debug_assert_ne!(challenger_id, challenged_id);
        let score_list = ScoreBoard::new(challenger_id.clone(), challenged_id.clone());
        Self {
            id,
            challenger_id,
            challenged_id,
            status: ChallengeStatus::Pending,
            challenger_joined: true,
            challenged_joined: false,
            challenged_ever_joined: false,
            match_id: None,
            started_at: None,
            score_list,
            guess_log: Vec::new(),
        }
    }

    pub fn is_participant(&self, player_id: &PlayerId) -> bool {
        player_id == &self.challenger_id || player_id == &self.challenged_id
    }

    pub fn opponent_of(&self, player_id: &PlayerId) -> Option<&PlayerId> {
        if player_id == &self.challenger_id {
            Some(&self.challenged_id)
        } else if player_id == &self.challenged_id {
            Some(&self.challenger_id)
        } else {
            None
        }
    }

    pub fn joined_flag(&self, player_id: &PlayerId) -> Option<bool> {
        if player_id == &self.challenger_id {
            Some(self.challenger_joined)
        } else if player_id == &self.challenged_id {
            Some(self.challenged_joined)
        } else {
            None
        }
    }

    pub fn both_absent(&self) -> bool {
        !self.challenger_joined && !self.challenged_joined
    }

    pub fn has_guessed(&self, player_id: &PlayerId, normalized_item: &str) -> bool {
        self.guess_log
            .iter()
            .any(|record| &record.player_id == player_id && record.item == normalized_item)
    }

    fn set_joined(&mut self, player_id: &PlayerId, joined: bool) -> bool {
        if player_id == &self.challenger_id {
            let changed = self.challenger_joined != joined;
            self.challenger_joined = joined;
            changed
        } else {
            let changed = self.challenged_joined != joined;
            self.challenged_joined = joined;
            if joined {
                self.challenged_ever_joined = true;
            }
            changed
        }
    }
}

/// A requested mutation of the document. Each variant carries the acting
/// player so the transition function can enforce who may do what; the
/// store's read-modify-write supplies atomicity.
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeUpdate {
    /// Own presence flag while on the match-setup screen. Players only ever
    /// write their own flag, so this never races with the opponent.
    SetPresence { player: PlayerId, joined: bool },
    /// Leaving the setup screen: clears the flag and, iff both flags are
    /// then false under a cancellable status, cancels in the same atomic
    /// step — so two departing clients can never both be "the canceller".
    LeaveSetup { player: PlayerId },
    /// Invited player takes the challenge; assigns the relay room.
    Accept { player: PlayerId, match_id: MatchId },
    /// Begin play. Conditional on `started_at` being unset, which makes the
    /// racing second caller a no-op rather than a second timestamp.
    Start { player: PlayerId },
    /// Explicit user cancellation.
    Cancel { player: PlayerId },
    /// Timer expiry or score target. Idempotent status set.
    Complete { player: PlayerId },
    /// One correct guess; deduplicated against the guess log.
    RecordGuess { player: PlayerId, item: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied(Applied),
    NoOp(NoOpReason),
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }

    pub fn status_became(&self) -> Option<ChallengeStatus> {
        match self {
            UpdateOutcome::Applied(applied) => applied.status_became,
            UpdateOutcome::NoOp(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// Set when the update moved the document to a new status.
    pub status_became: Option<ChallengeStatus>,
    /// Set when a score entry was incremented.
    pub scored: bool,
}

impl Applied {
    fn plain() -> Self {
        Self {
            status_became: None,
            scored: false,
        }
    }

    fn status(status: ChallengeStatus) -> Self {
        Self {
            status_became: Some(status),
            scored: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    NotParticipant,
    NotChallenged,
    WrongStatus(ChallengeStatus),
    ChallengerAbsent,
    PresenceIncomplete,
    AlreadyStarted,
    DuplicateGuess,
    EmptyGuess,
    Unchanged,
}

/// Apply one update to the document at server time `now`. Must run inside
/// the store's read-modify-write for the document.
pub fn apply_update(
    doc: &mut Challenge,
    update: &ChallengeUpdate,
    now: Timestamp,
) -> UpdateOutcome {
    match update {
        ChallengeUpdate::SetPresence { player, joined } => {
            if !doc.is_participant(player) {
                return UpdateOutcome::NoOp(NoOpReason::NotParticipant);
            }
            if !doc.set_joined(player, *joined) {
                return UpdateOutcome::NoOp(NoOpReason::Unchanged);
            }
            UpdateOutcome::Applied(Applied::plain())
        }
        ChallengeUpdate::LeaveSetup { player } => {
            if !doc.is_participant(player) {
                return UpdateOutcome::NoOp(NoOpReason::NotParticipant);
            }
            let changed = doc.set_joined(player, false);
            if doc.both_absent() && doc.status.is_cancellable() {
                doc.status = ChallengeStatus::Cancelled;
                return UpdateOutcome::Applied(Applied::status(ChallengeStatus::Cancelled));
            }
            if changed {
                UpdateOutcome::Applied(Applied::plain())
            } else {
                UpdateOutcome::NoOp(NoOpReason::Unchanged)
            }
        }
        ChallengeUpdate::Accept { player, match_id } => {
            if !doc.is_participant(player) {
                return UpdateOutcome::NoOp(NoOpReason::NotParticipant);
            }
            if player != &doc.challenged_id {
                return UpdateOutcome::NoOp(NoOpReason::NotChallenged);
            }
            if doc.status != ChallengeStatus::Pending {
                return UpdateOutcome::NoOp(NoOpReason::WrongStatus(doc.status));
            }
            if !doc.challenger_joined {
                return UpdateOutcome::NoOp(NoOpReason::ChallengerAbsent);
            }
            doc.match_id = Some(match_id.clone());
            doc.status = ChallengeStatus::Accepted;
            UpdateOutcome::Applied(Applied::status(ChallengeStatus::Accepted))
        }
        ChallengeUpdate::Start { player } => {
            if !doc.is_participant(player) {
                return UpdateOutcome::NoOp(NoOpReason::NotParticipant);
            }
            if doc.status != ChallengeStatus::Accepted {
                return UpdateOutcome::NoOp(NoOpReason::WrongStatus(doc.status));
            }
            if !(doc.challenger_joined && doc.challenged_joined) {
                return UpdateOutcome::NoOp(NoOpReason::PresenceIncomplete);
            }
            if doc.started_at.is_some() {
                return UpdateOutcome::NoOp(NoOpReason::AlreadyStarted);
            }
            doc.started_at = Some(now);
            doc.status = ChallengeStatus::Active;
            UpdateOutcome::Applied(Applied::status(ChallengeStatus::Active))
        }
        ChallengeUpdate::Cancel { player } => {
            if !doc.is_participant(player) {
                return UpdateOutcome::NoOp(NoOpReason::NotParticipant);
            }
            if !doc.status.is_cancellable() {
                return UpdateOutcome::NoOp(NoOpReason::WrongStatus(doc.status));
            }
            doc.status = ChallengeStatus::Cancelled;
            UpdateOutcome::Applied(Applied::status(ChallengeStatus::Cancelled))
        }
        ChallengeUpdate::Complete { player } => {
            if !doc.is_participant(player) {
                return UpdateOutcome::NoOp(NoOpReason::NotParticipant);
            }
            if doc.status != ChallengeStatus::Active {
                return UpdateOutcome::NoOp(NoOpReason::WrongStatus(doc.status));
            }
            doc.status = ChallengeStatus::Completed;
            UpdateOutcome::Applied(Applied::status(ChallengeStatus::Completed))
        }
        ChallengeUpdate::RecordGuess { player, item } => {
            if !doc.is_participant(player) {
                return UpdateOutcome::NoOp(NoOpReason::NotParticipant);
            }
            if doc.status != ChallengeStatus::Active {
                return UpdateOutcome::NoOp(NoOpReason::WrongStatus(doc.status));
            }
            let normalized = rules::normalize_guess(item);
            if normalized.is_empty() {
                return UpdateOutcome::NoOp(NoOpReason::EmptyGuess);
            }
            if doc.has_guessed(player, &normalized) {
                return UpdateOutcome::NoOp(NoOpReason::DuplicateGuess);
            }
            doc.guess_log.push(GuessRecord {
                player_id: player.clone(),
                item: normalized.clone(),
            });
            let scored = rules::is_scorable(&normalized) && doc.score_list.bump(player);
            UpdateOutcome::Applied(Applied {
                status_became: None,
                scored,
            })
        }
    }
}
