use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use geoduel_core::{apply_update, Challenge, ChallengeId, ChallengeUpdate, Timestamp, UpdateOutcome};

use crate::store::{
    DocumentStore, MissedChallengeRecord, SnapshotHook, StoreError, StoreSubscription,
};

struct StoreInner {
    docs: HashMap<ChallengeId, Challenge>,
    subscribers: HashMap<ChallengeId, Vec<(u64, SnapshotHook)>>,
    missed: Vec<MissedChallengeRecord>,
    next_hook_id: u64,
}

/// In-memory document store: the reference backend for tests and the CLI
/// simulation. Runs `apply_update` under its interior borrow so the
/// document stays the serialization point, then fans the fresh snapshot
/// out to subscribers — after releasing the borrow, so a hook may issue
/// further updates.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Rc<RefCell<StoreInner>>,
    /// Fixed clock for deterministic tests; `None` means system time.
    clock: Rc<Cell<Option<Timestamp>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                docs: HashMap::new(),
                subscribers: HashMap::new(),
                missed: Vec::new(),
                next_hook_id: 0,
            })),
            clock: Rc::new(Cell::new(None)),
        }
    }

    pub fn set_clock(&self, now: Timestamp) {
        self.clock.set(Some(now));
    }

    pub fn advance_clock(&self, delta_ms: i64) {
        if let Some(now) = self.clock.get() {
            self.clock.set(Some(now + delta_ms));
        }
    }

    pub fn missed_challenges(&self) -> Vec<MissedChallengeRecord> {
        self.inner.borrow().missed.clone()
    }

    fn notify(&self, id: &ChallengeId, doc: &Challenge) {
        let hooks: Vec<SnapshotHook> = {
            let inner = self.inner.borrow();
            inner
                .subscribers
                .get(id)
                .map(|hooks| hooks.iter().map(|(_, hook)| hook.clone()).collect())
                .unwrap_or_default()
        };
        for hook in hooks {
            hook(doc);
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn now(&self) -> Timestamp {
        if let Some(now) = self.clock.get() {
            return now;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn create(&self, doc: Challenge) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.docs.contains_key(&doc.id) {
            return Err(StoreError::AlreadyExists(doc.id.to_string()));
        }
        let id = doc.id.clone();
        let snapshot = doc.clone();
        inner.docs.insert(id.clone(), doc);
        drop(inner);
        self.notify(&id, &snapshot);
        Ok(())
    }

    fn read(&self, id: &ChallengeId) -> Result<Option<Challenge>, StoreError> {
        Ok(self.inner.borrow().docs.get(id).cloned())
    }

    fn update(
        &self,
        id: &ChallengeId,
        update: ChallengeUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let now = self.now();
        let (outcome, snapshot) = {
            let mut inner = self.inner.borrow_mut();
            let Some(doc) = inner.docs.get_mut(id) else {
                return Err(StoreError::NotFound(id.to_string()));
            };
            let outcome = apply_update(doc, &update, now);
            let snapshot = if outcome.is_applied() {
                Some(doc.clone())
            } else {
                None
            };
            (outcome, snapshot)
        };
        match &snapshot {
            Some(doc) => self.notify(id, doc),
            None => debug!(challenge = %id, ?outcome, "update was a no-op"),
        }
        Ok(outcome)
    }

    fn subscribe(&self, id: &ChallengeId, hook: SnapshotHook) -> StoreSubscription {
        let hook_id = {
            let mut inner = self.inner.borrow_mut();
            let hook_id = inner.next_hook_id;
            inner.next_hook_id = inner.next_hook_id.wrapping_add(1);
            inner
                .subscribers
                .entry(id.clone())
                .or_default()
                .push((hook_id, hook));
            hook_id
        };
        let weak = Rc::downgrade(&self.inner);
        let id = id.clone();
        StoreSubscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(hooks) = inner.borrow_mut().subscribers.get_mut(&id) {
                    hooks.retain(|(existing, _)| *existing != hook_id);
                }
            }
        })
    }

    fn record_missed_challenge(&self, record: MissedChallengeRecord) -> Result<(), StoreError> {
        self.inner.borrow_mut().missed.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use geoduel_core::{ChallengeStatus, PlayerId};

    fn new_doc() -> Challenge {
        Challenge::create(
            ChallengeId::from("challenge-1"),
            PlayerId::from("player-a"),
            PlayerId::from("player-b"),
        )
    }

    #[test]
    fn create_rejects_duplicates() {
        let store = MemoryDocumentStore::new();
        store.create(new_doc()).expect("first create");
        assert!(matches!(
            store.create(new_doc()),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn applied_updates_notify_subscribers_no_ops_do_not() {
        let store = MemoryDocumentStore::new();
        store.create(new_doc()).expect("create");

        let seen: Rc<RefCell<Vec<ChallengeStatus>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _sub = store.subscribe(
            &ChallengeId::from("challenge-1"),
            Rc::new(move |doc: &Challenge| sink.borrow_mut().push(doc.status)),
        );

        let id = ChallengeId::from("challenge-1");
        store
            .update(
                &id,
                ChallengeUpdate::Cancel {
                    player: PlayerId::from("player-a"),
                },
            )
            .expect("update");
        // Second cancel is a no-op and must not produce a snapshot.
        store
            .update(
                &id,
                ChallengeUpdate::Cancel {
                    player: PlayerId::from("player-a"),
                },
            )
            .expect("update");

        assert_eq!(seen.borrow().as_slice(), &[ChallengeStatus::Cancelled]);
    }

    #[test]
    fn dropping_the_subscription_unhooks() {
        let store = MemoryDocumentStore::new();
        store.create(new_doc()).expect("create");
        let id = ChallengeId::from("challenge-1");

        let count = Rc::new(Cell::new(0u32));
        let sink = count.clone();
        let sub = store.subscribe(&id, Rc::new(move |_doc: &Challenge| sink.set(sink.get() + 1)));

        store
            .update(
                &id,
                ChallengeUpdate::SetPresence {
                    player: PlayerId::from("player-b"),
                    joined: true,
                },
            )
            .expect("update");
        assert_eq!(count.get(), 1);

        drop(sub);
        store
            .update(
                &id,
                ChallengeUpdate::SetPresence {
                    player: PlayerId::from("player-b"),
                    joined: false,
                },
            )
            .expect("update");
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn fixed_clock_stamps_started_at() {
        let store = MemoryDocumentStore::new();
        store.set_clock(5_000);
        store.create(new_doc()).expect("create");
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
                    match_id: "duel12345678".parse().expect("match id"),
                },
            )
            .expect("accept");
        store.advance_clock(1_000);
        store
            .update(
                &id,
                ChallengeUpdate::Start {
                    player: PlayerId::from("player-a"),
                },
            )
            .expect("start");

        let doc = store.read(&id).expect("read").expect("exists");
        assert_eq!(doc.started_at, Some(6_000));
    }
}
