use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use tracing::{debug, warn};

use geoduel_core::rules::{is_scorable, normalize_guess, reaches_target};
use geoduel_core::{Challenge, ChallengeId, ChallengeUpdate, ClientMsg, MatchId, PlayerId, ServerMsg};

use crate::hooks::{MatchEvent, MatchHooks, ScoreView};
use crate::relay::RelayLink;
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    /// Counted for this player's score.
    Scored,
    /// Recognized and logged, but barred from scoring by rule.
    Excluded,
    /// Already counted for this player; nothing happened.
    Duplicate,
    /// Normalized to nothing; nothing happened.
    Ignored,
}

/// Merges each player's correct guesses into the shared score view.
///
/// Three feeds meet here. Local guesses score optimistically and go out on
/// both channels. Opponent guesses arrive over the relay first and bump
/// the displayed score without waiting for the document. Every document
/// snapshot then re-seeds the dedup sets from the guess log and adopts the
/// authoritative scores — a lost relay frame costs latency, never
/// correctness, and a duplicated one is absorbed by the sets.
pub struct GuessSynchronizer {
    store: Rc<dyn DocumentStore>,
    relay: Rc<dyn RelayLink>,
    challenge_id: ChallengeId,
    room_id: MatchId,
    self_id: PlayerId,
    opponent_id: PlayerId,
    own_guessed: RefCell<HashSet<String>>,
    opponent_guessed: RefCell<HashSet<String>>,
    scores: Cell<ScoreView>,
    target_fired: Cell<bool>,
    hooks: MatchHooks,
}

impl GuessSynchronizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Rc<dyn DocumentStore>,
        relay: Rc<dyn RelayLink>,
        challenge_id: ChallengeId,
        room_id: MatchId,
        self_id: PlayerId,
        opponent_id: PlayerId,
        hooks: MatchHooks,
    ) -> Self {
        Self {
            store,
            relay,
            challenge_id,
            room_id,
            self_id,
            opponent_id,
            own_guessed: RefCell::new(HashSet::new()),
            opponent_guessed: RefCell::new(HashSet::new()),
            scores: Cell::new(ScoreView::default()),
            target_fired: Cell::new(false),
            hooks,
        }
    }

    pub fn scores(&self) -> ScoreView {
        self.scores.get()
    }

    /// A locally-recognized correct guess. Deduplicates, scores
    /// optimistically, fans out on the relay, and writes the document.
    /// A store error leaves the optimistic state in place — the next
    /// snapshot settles it either way — and hands the retry to the caller.
    pub fn submit_guess(&self, raw: &str) -> Result<GuessOutcome, StoreError> {
        let item = normalize_guess(raw);
        if item.is_empty() {
            return Ok(GuessOutcome::Ignored);
        }
        if !self.own_guessed.borrow_mut().insert(item.clone()) {
            return Ok(GuessOutcome::Duplicate);
        }

        let scorable = is_scorable(&item);
        if scorable {
            let mut scores = self.scores.get();
            scores.own = scores.own.saturating_add(1);
            self.set_scores(scores);
        }

        self.relay.publish(ClientMsg::Guess {
            room_id: self.room_id.to_string(),
            player_id: self.self_id.to_string(),
            item: item.clone(),
        });

        if let Err(err) = self.store.update(
            &self.challenge_id,
            ChallengeUpdate::RecordGuess {
                player: self.self_id.clone(),
                item,
            },
        ) {
            if matches!(err, StoreError::Unavailable(_)) {
                (self.hooks.on_event)(MatchEvent::StoreUnavailable);
            }
            return Err(err);
        }

        Ok(if scorable {
            GuessOutcome::Scored
        } else {
            GuessOutcome::Excluded
        })
    }

    /// Opponent feedback from the relay — the latency-hiding path. The
    /// displayed score moves immediately; the document confirms later.
    pub fn handle_relay(&self, msg: &ServerMsg) {
        let ServerMsg::Guess { player_id, item } = msg else {
            return;
        };
        if player_id == self.self_id.as_str() {
            // The relay excludes the sender; an echo is harmless anyway.
            return;
        }
        if player_id != self.opponent_id.as_str() {
            warn!(player = %player_id, "guess from a player outside this match");
            return;
        }
        let item = normalize_guess(item);
        if item.is_empty() {
            return;
        }
        if !self.opponent_guessed.borrow_mut().insert(item.clone()) {
            debug!(%item, "duplicate relay guess dropped");
            return;
        }
        if is_scorable(&item) {
            let mut scores = self.scores.get();
            scores.opponent = scores.opponent.saturating_add(1);
            self.set_scores(scores);
        }
        (self.hooks.on_event)(MatchEvent::OpponentGuessed { item });
    }

    /// Authoritative reconciliation. The document's score list wins every
    /// disagreement, and the dedup sets are rebuilt from its guess log.
    pub fn handle_snapshot(&self, doc: &Challenge) {
        let mut own = HashSet::new();
        let mut opponent = HashSet::new();
        for record in &doc.guess_log {
            if record.player_id == self.self_id {
                own.insert(record.item.clone());
            } else if record.player_id == self.opponent_id {
                opponent.insert(record.item.clone());
            }
        }
        *self.own_guessed.borrow_mut() = own;
        *self.opponent_guessed.borrow_mut() = opponent;

        let authoritative = ScoreView {
            own: doc.score_list.score(&self.self_id).unwrap_or(0),
            opponent: doc.score_list.score(&self.opponent_id).unwrap_or(0),
        };
        self.set_scores(authoritative);
    }

    fn set_scores(&self, next: ScoreView) {
        if self.scores.get() != next {
            self.scores.set(next);
            (self.hooks.on_scores)(next);
        }
        if !self.target_fired.get() && (reaches_target(next.own) || reaches_target(next.opponent)) {
            self.target_fired.set(true);
            (self.hooks.on_event)(MatchEvent::TargetReached);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use geoduel_core::rules::SCORE_TARGET;
    use geoduel_core::ChallengeStatus;

    use crate::memory_store::MemoryDocumentStore;

    struct RecordingRelay {
        sent: RefCell<Vec<ClientMsg>>,
    }

    impl RecordingRelay {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                sent: RefCell::new(Vec::new()),
            })
        }

        fn guesses(&self) -> usize {
            self.sent
                .borrow()
                .iter()
                .filter(|msg| matches!(msg, ClientMsg::Guess { .. }))
                .count()
        }
    }

    impl RelayLink for RecordingRelay {
        fn publish(&self, msg: ClientMsg) {
            self.sent.borrow_mut().push(msg);
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn match_id() -> MatchId {
        "duel12345678".parse().expect("match id")
    }

    /// Store holding an already-active challenge between a and b.
    fn active_store() -> Rc<MemoryDocumentStore> {
        let store = Rc::new(MemoryDocumentStore::new());
        store.set_clock(1_000);
        let doc = Challenge::create(
            ChallengeId::from("challenge-1"),
            PlayerId::from("player-a"),
            PlayerId::from("player-b"),
        );
        store.create(doc).expect("create");
        let id = ChallengeId::from("challenge-1");
        store
            .update(
                &id,
                ChallengeUpdate::SetPresence {
                    player: PlayerId::from("player-b"),
                    joined: true,
                },
            )
            .expect("presence");
        store
            .update(
                &id,
                ChallengeUpdate::Accept {
                    player: PlayerId::from("player-b"),
                    match_id: match_id(),
                },
            )
            .expect("accept");
        store
            .update(
                &id,
                ChallengeUpdate::Start {
                    player: PlayerId::from("player-a"),
                },
            )
            .expect("start");
        store
    }

    fn sync_for(
        store: &Rc<MemoryDocumentStore>,
        relay: &Rc<RecordingRelay>,
        hooks: MatchHooks,
    ) -> GuessSynchronizer {
        GuessSynchronizer::new(
            store.clone(),
            relay.clone(),
            ChallengeId::from("challenge-1"),
            match_id(),
            PlayerId::from("player-a"),
            PlayerId::from("player-b"),
            hooks,
        )
    }

    #[test]
    fn repeated_local_guess_scores_and_publishes_once() {
        let store = active_store();
        let relay = RecordingRelay::new();
        let sync = sync_for(&store, &relay, MatchHooks::empty());

        assert_eq!(sync.submit_guess("France").expect("guess"), GuessOutcome::Scored);
        assert_eq!(
            sync.submit_guess("  FRANCE ").expect("guess"),
            GuessOutcome::Duplicate
        );

        assert_eq!(sync.scores().own, 1);
        assert_eq!(relay.guesses(), 1);

        let doc = store
            .read(&ChallengeId::from("challenge-1"))
            .expect("read")
            .expect("exists");
        assert_eq!(doc.score_list.score(&PlayerId::from("player-a")), Some(1));
    }

    #[test]
    fn excluded_territory_publishes_and_logs_but_never_scores() {
        let store = active_store();
        let relay = RecordingRelay::new();
        let sync = sync_for(&store, &relay, MatchHooks::empty());

        assert_eq!(
            sync.submit_guess("Western Sahara").expect("guess"),
            GuessOutcome::Excluded
        );
        assert_eq!(sync.scores().own, 0);
        assert_eq!(relay.guesses(), 1);

        let doc = store
            .read(&ChallengeId::from("challenge-1"))
            .expect("read")
            .expect("exists");
        assert_eq!(doc.score_list.max_score(), 0);
        assert_eq!(doc.guess_log.len(), 1);

        // And the same rule holds on the relay path for the opponent.
        sync.handle_relay(&ServerMsg::Guess {
            player_id: "player-b".into(),
            item: "western sahara".into(),
        });
        assert_eq!(sync.scores().opponent, 0);
    }

    #[test]
    fn duplicated_relay_frames_count_once() {
        let store = active_store();
        let relay = RecordingRelay::new();
        let sync = sync_for(&store, &relay, MatchHooks::empty());

        let frame = ServerMsg::Guess {
            player_id: "player-b".into(),
            item: "Japan".into(),
        };
        sync.handle_relay(&frame);
        sync.handle_relay(&frame);
        assert_eq!(sync.scores().opponent, 1);
    }

    #[test]
    fn own_echo_and_strangers_are_ignored() {
        let store = active_store();
        let relay = RecordingRelay::new();
        let sync = sync_for(&store, &relay, MatchHooks::empty());

        sync.handle_relay(&ServerMsg::Guess {
            player_id: "player-a".into(),
            item: "Japan".into(),
        });
        sync.handle_relay(&ServerMsg::Guess {
            player_id: "somebody-else".into(),
            item: "Japan".into(),
        });
        assert_eq!(sync.scores(), ScoreView::default());
    }

    #[test]
    fn snapshot_recovers_a_lost_relay_frame_and_seeds_dedup() {
        let store = active_store();
        let relay = RecordingRelay::new();
        let sync = sync_for(&store, &relay, MatchHooks::empty());
        let id = ChallengeId::from("challenge-1");

        // The opponent guessed, but the relay frame never arrived. The
        // document still recorded it.
        store
            .update(
                &id,
                ChallengeUpdate::RecordGuess {
                    player: PlayerId::from("player-b"),
                    item: "Japan".into(),
                },
            )
            .expect("record");

        let doc = store.read(&id).expect("read").expect("exists");
        sync.handle_snapshot(&doc);
        assert_eq!(sync.scores().opponent, 1);

        // The frame finally shows up late; the re-seeded dedup set drops it.
        sync.handle_relay(&ServerMsg::Guess {
            player_id: "player-b".into(),
            item: "Japan".into(),
        });
        assert_eq!(sync.scores().opponent, 1);
    }

    #[test]
    fn document_wins_when_it_disagrees() {
        let store = active_store();
        let relay = RecordingRelay::new();
        let sync = sync_for(&store, &relay, MatchHooks::empty());

        sync.submit_guess("France").expect("guess");
        sync.submit_guess("Japan").expect("guess");
        assert_eq!(sync.scores().own, 2);

        // A snapshot from before those writes landed: adopt it anyway.
        let stale = Challenge::create(
            ChallengeId::from("challenge-1"),
            PlayerId::from("player-a"),
            PlayerId::from("player-b"),
        );
        sync.handle_snapshot(&stale);
        assert_eq!(sync.scores().own, 0);

        // The current snapshot restores the truth.
        let doc = store
            .read(&ChallengeId::from("challenge-1"))
            .expect("read")
            .expect("exists");
        sync.handle_snapshot(&doc);
        assert_eq!(sync.scores().own, 2);
    }

    #[test]
    fn target_reached_fires_once_across_both_paths() {
        let store = active_store();
        let relay = RecordingRelay::new();
        let fired = Rc::new(Cell::new(0u32));
        let sink = fired.clone();
        let hooks = MatchHooks {
            on_event: Rc::new(move |event| {
                if matches!(event, MatchEvent::TargetReached) {
                    sink.set(sink.get() + 1);
                }
            }),
            ..MatchHooks::empty()
        };
        let sync = sync_for(&store, &relay, hooks);

        // Build a document where the opponent sits at the target.
        let mut doc = store
            .read(&ChallengeId::from("challenge-1"))
            .expect("read")
            .expect("exists");
        for n in 0..SCORE_TARGET {
            geoduel_core::apply_update(
                &mut doc,
                &ChallengeUpdate::RecordGuess {
                    player: PlayerId::from("player-b"),
                    item: format!("country-{n}"),
                },
                2_000 + n as i64,
            );
        }
        assert_eq!(doc.status, ChallengeStatus::Active);

        sync.handle_snapshot(&doc);
        sync.handle_snapshot(&doc);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn store_failure_keeps_optimistic_state_and_reports() {
        struct DownStore;

        impl DocumentStore for DownStore {
            fn now(&self) -> geoduel_core::Timestamp {
                0
            }

            fn create(&self, _doc: Challenge) -> Result<(), StoreError> {
                Err(StoreError::Unavailable("offline".into()))
            }

            fn read(&self, _id: &ChallengeId) -> Result<Option<Challenge>, StoreError> {
                Err(StoreError::Unavailable("offline".into()))
            }

            fn update(
                &self,
                _id: &ChallengeId,
                _update: ChallengeUpdate,
            ) -> Result<geoduel_core::UpdateOutcome, StoreError> {
                Err(StoreError::Unavailable("offline".into()))
            }

            fn subscribe(
                &self,
                _id: &ChallengeId,
                _hook: crate::store::SnapshotHook,
            ) -> crate::store::StoreSubscription {
                crate::store::StoreSubscription::new(|| {})
            }

            fn record_missed_challenge(
                &self,
                _record: crate::store::MissedChallengeRecord,
            ) -> Result<(), StoreError> {
                Err(StoreError::Unavailable("offline".into()))
            }
        }

        let relay = RecordingRelay::new();
        let unavailable_events = Rc::new(Cell::new(0u32));
        let sink = unavailable_events.clone();
        let hooks = MatchHooks {
            on_event: Rc::new(move |event| {
                if matches!(event, MatchEvent::StoreUnavailable) {
                    sink.set(sink.get() + 1);
                }
            }),
            ..MatchHooks::empty()
        };
        let sync = GuessSynchronizer::new(
            Rc::new(DownStore),
            relay.clone(),
            ChallengeId::from("challenge-1"),
            match_id(),
            PlayerId::from("player-a"),
            PlayerId::from("player-b"),
            hooks,
        );

        let result = sync.submit_guess("France");
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        // Optimistic score and the relay publish already happened; the
        // next snapshot is what settles the truth. The UI got its retry
        // affordance signal.
        assert_eq!(sync.scores().own, 1);
        assert_eq!(relay.guesses(), 1);
        assert_eq!(unavailable_events.get(), 1);
    }
}
