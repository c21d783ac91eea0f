//! Scripted two-player duel against a live relay. The in-memory document
//! store stands in for the production backend; both simulated clients
//! share it, which is exactly the consistency model the components are
//! built for — snapshots from either player's writes, in either order.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::info;

use geoduel::{
    ChallengeFlow, ChannelRelay, DocumentStore, GuessSynchronizer, MatchHooks, MatchTimer,
    MemoryDocumentStore, PlayerProfile, PresenceTracker, RelayDriver, RelayLink, RelaySocket,
    Role, StoreSubscription,
};
use geoduel_core::{
    Challenge, ChallengeId, MatchId, PlayerId, ServerMsg, MATCH_DURATION_MS,
};

struct DuelClient {
    label: &'static str,
    flow: Rc<ChallengeFlow>,
    presence: PresenceTracker,
    timer: MatchTimer,
    guesses: GuessSynchronizer,
    driver: RelayDriver,
    inbox: Rc<RefCell<Vec<Challenge>>>,
    _subscription: StoreSubscription,
}

impl DuelClient {
    /// Apply buffered document snapshots to every component. The document
    /// always wins, so order within the buffer does not matter beyond
    /// latest-last.
    fn drain_snapshots(&self) {
        let docs: Vec<Challenge> = self.inbox.borrow_mut().drain(..).collect();
        for doc in docs {
            self.flow.handle_snapshot(&doc);
            self.presence.handle_snapshot(&doc);
            self.guesses.handle_snapshot(&doc);
            if let Some(started_at) = doc.started_at {
                self.timer.observe_started_at(started_at);
            }
        }
    }

    /// Bounded poll of the relay; returns once `dur` passes with nothing
    /// inbound.
    async fn pump_relay(&mut self, dur: Duration) {
        while let Some(msg) = self.driver.next_timeout(dur).await {
            self.presence.handle_relay(&msg);
            self.guesses.handle_relay(&msg);
            match &msg {
                ServerMsg::Welcome { room_id } => {
                    info!("[{}] joined room {room_id}", self.label);
                }
                ServerMsg::MatchStarted { match_id, .. } => {
                    info!("[{}] advisory start for {match_id}", self.label);
                }
                _ => {}
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_client(
    label: &'static str,
    store: &Rc<MemoryDocumentStore>,
    challenge_id: &ChallengeId,
    match_id: &MatchId,
    self_id: &PlayerId,
    opponent_id: &PlayerId,
    role: Role,
    relay: ChannelRelay,
    driver: RelayDriver,
) -> DuelClient {
    let hooks = logging_hooks(label);
    let relay: Rc<dyn RelayLink> = Rc::new(relay);
    let flow = Rc::new(ChallengeFlow::new(
        store.clone(),
        relay.clone(),
        challenge_id.clone(),
        role,
        PlayerProfile::placeholder(self_id.clone()),
        PlayerProfile::placeholder(opponent_id.clone()),
        hooks.clone(),
    ));
    let presence = PresenceTracker::new(
        store.clone(),
        flow.clone(),
        challenge_id.clone(),
        self_id.clone(),
        opponent_id.clone(),
        hooks.clone(),
    );
    let timer = MatchTimer::new(MATCH_DURATION_MS, hooks.clone());
    let guesses = GuessSynchronizer::new(
        store.clone(),
        relay,
        challenge_id.clone(),
        match_id.clone(),
        self_id.clone(),
        opponent_id.clone(),
        hooks,
    );
    let inbox: Rc<RefCell<Vec<Challenge>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = inbox.clone();
    let subscription = store.subscribe(
        challenge_id,
        Rc::new(move |doc: &Challenge| sink.borrow_mut().push(doc.clone())),
    );
    DuelClient {
        label,
        flow,
        presence,
        timer,
        guesses,
        driver,
        inbox,
        _subscription: subscription,
    }
}

fn logging_hooks(label: &'static str) -> MatchHooks {
    MatchHooks {
        on_status: Rc::new(move |status| info!("[{label}] status -> {}", status.as_str())),
        on_opponent_presence: Rc::new(move |present| {
            info!("[{label}] opponent present: {present}")
        }),
        on_scores: Rc::new(move |scores| {
            info!("[{label}] scores own={} opponent={}", scores.own, scores.opponent)
        }),
        on_remaining: Rc::new(move |ms| info!("[{label}] remaining {}s", ms / 1000)),
        on_event: Rc::new(move |event| info!("[{label}] event: {event:?}")),
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) async fn run(base_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = Rc::new(MemoryDocumentStore::new());
    let challenger = PlayerId::from("player-a");
    let challenged = PlayerId::from("player-b");
    let challenge_id = ChallengeId::from("duel-sim");

    ChallengeFlow::issue(
        store.as_ref(),
        challenge_id.clone(),
        challenger.clone(),
        challenged.clone(),
    )?;

    let match_id: MatchId = crate::generate_match_id().parse()?;
    info!(%match_id, "relay room key");

    let socket_a = RelaySocket::connect(base_url, &match_id, &challenger).await?;
    let socket_b = RelaySocket::connect(base_url, &match_id, &challenged).await?;
    let (relay_a, driver_a) = socket_a.into_channel();
    let (relay_b, driver_b) = socket_b.into_channel();

    let mut a = build_client(
        "a",
        &store,
        &challenge_id,
        &match_id,
        &challenger,
        &challenged,
        Role::Challenger,
        relay_a,
        driver_a,
    );
    let mut b = build_client(
        "b",
        &store,
        &challenge_id,
        &match_id,
        &challenged,
        &challenger,
        Role::Challenged,
        relay_b,
        driver_b,
    );

    // The invited player lands on the setup screen and takes the challenge.
    b.presence.enter_setup()?;
    b.flow.accept(match_id.clone())?;
    a.drain_snapshots();
    b.drain_snapshots();

    // Both clients race the start; the document keeps a single started_at.
    a.flow.start()?;
    b.flow.start()?;
    a.drain_snapshots();
    b.drain_snapshots();
    a.pump_relay(Duration::from_millis(200)).await;
    b.pump_relay(Duration::from_millis(200)).await;

    // Scripted guesses: a duplicate and the excluded territory included.
    for item in ["France", "Japan", "France", "Western Sahara", "Brazil"] {
        let outcome = a.guesses.submit_guess(item)?;
        info!("[a] guessed {item}: {outcome:?}");
    }
    for item in ["France", "Germany"] {
        let outcome = b.guesses.submit_guess(item)?;
        info!("[b] guessed {item}: {outcome:?}");
    }
    b.pump_relay(Duration::from_millis(300)).await;
    a.pump_relay(Duration::from_millis(300)).await;
    a.drain_snapshots();
    b.drain_snapshots();

    info!("[a] final view {:?}", a.guesses.scores());
    info!("[b] final view {:?}", b.guesses.scores());

    // Tick both countdowns now, then fast-forward past the deadline. Both
    // clients detect expiry independently; the completion write is
    // idempotent so the second one no-ops.
    let doc = store.read(&challenge_id)?.ok_or("challenge vanished")?;
    let started_at = doc.started_at.ok_or("match never started")?;
    a.timer.tick(now_ms());
    b.timer.tick(now_ms());
    let past_deadline = started_at + MATCH_DURATION_MS + 1;
    a.timer.tick(past_deadline);
    b.timer.tick(past_deadline);
    if a.timer.is_expired() {
        a.flow.complete()?;
    }
    if b.timer.is_expired() {
        b.flow.complete()?;
    }
    a.drain_snapshots();
    b.drain_snapshots();

    let doc = store.read(&challenge_id)?.ok_or("challenge vanished")?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
