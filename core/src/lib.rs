pub mod challenge;
pub mod codec;
pub mod ids;
pub mod protocol;
pub mod rules;
pub mod timer;

pub use challenge::{
    apply_update, Applied, Challenge, ChallengeStatus, ChallengeUpdate, GuessRecord, NoOpReason,
    ScoreBoard, ScoreEntry, Timestamp, UpdateOutcome,
};
pub use codec::{decode, encode};
pub use ids::{ChallengeId, MatchId, MatchIdError, PlayerId, MATCH_ID_ALPHABET, MATCH_ID_LEN};
pub use protocol::{ClientMsg, ServerMsg};
pub use rules::{EXCLUDED_TERRITORY, MATCH_DURATION_MS, SCORE_TARGET};
