use std::rc::Rc;

use serde::{Deserialize, Serialize};

use geoduel_core::{Challenge, ChallengeId, ChallengeUpdate, PlayerId, Timestamp, UpdateOutcome};

/// Errors crossing the document-store seam. Everything here is either
/// retried by the caller on its next transition or surfaced as the single
/// user-visible "store unavailable" failure with a retry affordance.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("challenge not found: {0}")]
    NotFound(String),
    #[error("challenge already exists: {0}")]
    AlreadyExists(String),
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Side record written when a cancelled challenge's invited player never
/// joined. `owner_id` is the player whose feed the record lands in,
/// `friend_id` the player they missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedChallengeRecord {
    pub owner_id: PlayerId,
    pub friend_id: PlayerId,
    pub friend_name: String,
    pub friend_avatar: Option<String>,
    pub timestamp: Timestamp,
}

/// Display identity for a participant. Lookup failures degrade to a
/// placeholder rather than blocking the match lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub name: String,
    pub avatar: Option<String>,
}

impl PlayerProfile {
    pub fn placeholder(id: PlayerId) -> Self {
        Self {
            id,
            name: "Explorer".to_string(),
            avatar: None,
        }
    }
}

pub type SnapshotHook = Rc<dyn Fn(&Challenge)>;

/// The authoritative store seam. Backends must run
/// [`geoduel_core::apply_update`] inside a read-modify-write of the named
/// document; that function is the serialization point all the conditional
/// transitions rely on. The snapshot feed delivers the latest state after
/// each applied update and may skip intermediate states.
pub trait DocumentStore {
    /// Server-assigned time in milliseconds. Clients never substitute their
    /// own clock for fields the protocol stamps with this.
    fn now(&self) -> Timestamp;

    fn create(&self, doc: Challenge) -> Result<(), StoreError>;

    fn read(&self, id: &ChallengeId) -> Result<Option<Challenge>, StoreError>;

    /// Apply one update atomically. A `NoOp` outcome is a normal result of
    /// racing clients, not an error, and produces no snapshot.
    fn update(
        &self,
        id: &ChallengeId,
        update: ChallengeUpdate,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Subscribe to the document's change feed. The hook fires for every
    /// applied update until the returned handle is dropped.
    fn subscribe(&self, id: &ChallengeId, hook: SnapshotHook) -> StoreSubscription;

    fn record_missed_challenge(&self, record: MissedChallengeRecord) -> Result<(), StoreError>;
}

/// Change-feed registration; dropping it unhooks the subscriber so an
/// unmounted screen cannot leak callbacks.
pub struct StoreSubscription {
    unhook: Option<Box<dyn FnOnce()>>,
}

impl StoreSubscription {
    pub fn new(unhook: impl FnOnce() + 'static) -> Self {
        Self {
            unhook: Some(Box::new(unhook)),
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        if let Some(unhook) = self.unhook.take() {
            unhook();
        }
    }
}
