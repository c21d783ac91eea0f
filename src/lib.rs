//! Client-side runtime for the duel protocol: the components that take two
//! independent clients from "challenge issued" to a consistent, time-bounded
//! match and back out to completed or cancelled.
//!
//! Two loosely-coupled channels feed these components. The authoritative
//! challenge document (behind [`store::DocumentStore`]) is the binding
//! contract between clients; the relay (behind [`relay::RelayLink`]) is an
//! ephemeral latency optimization that may drop, duplicate, or reorder.
//! Whenever the two disagree, the document wins.

pub mod challenge_flow;
pub mod guess_sync;
pub mod hooks;
pub mod match_timer;
pub mod memory_store;
pub mod presence;
pub mod relay;
pub mod relay_socket;
pub mod store;

pub use challenge_flow::{ChallengeFlow, Role};
pub use guess_sync::{GuessOutcome, GuessSynchronizer};
pub use hooks::{MatchEvent, MatchHooks, ScoreView};
pub use match_timer::MatchTimer;
pub use memory_store::MemoryDocumentStore;
pub use presence::{LeaveOutcome, PresenceTracker};
pub use relay::{NullRelay, RelayLink};
pub use relay_socket::{ChannelRelay, RelayDriver, RelayError, RelaySocket};
pub use store::{
    DocumentStore, MissedChallengeRecord, PlayerProfile, SnapshotHook, StoreError,
    StoreSubscription,
};
