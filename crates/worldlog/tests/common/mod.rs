#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use worldlog::{
    Action, Actor, Backend, BlockPos, BlockState, ChangeLogStore, ChangeRecord, Direction,
    MemoryStore, NewRecord, RecordId, Scope, State, StoreError, StoreResult, Timestamp,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Enter(String),
    Exit(String),
    Begin,
    Commit,
    End,
}

/// A memory store that records calls and can be slowed down or made to
/// fail, for exercising the engine and batcher.
pub struct InstrumentedStore {
    inner: MemoryStore,
    backend: Backend,
    delay: Duration,
    /// Block in `mutate_batch` until this many calls are inside at once.
    rendezvous: usize,
    arrived: Mutex<usize>,
    arrived_cv: Condvar,
    pub rendezvous_timed_out: AtomicBool,
    pub fail_commits: AtomicUsize,
    pub events: Mutex<Vec<Event>>,
}

impl InstrumentedStore {
    pub fn new(backend: Backend) -> Self {
        Self {
            inner: MemoryStore::new(),
            backend,
            delay: Duration::ZERO,
            rendezvous: 0,
            arrived: Mutex::new(0),
            arrived_cv: Condvar::new(),
            rendezvous_timed_out: AtomicBool::new(false),
            fail_commits: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_rendezvous(mut self, parties: usize) -> Self {
        self.rendezvous = parties;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn get(&self, id: RecordId) -> Option<ChangeRecord> {
        self.inner.get(id)
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn wait_for_peers(&self) {
        let mut arrived = self.arrived.lock();
        *arrived += 1;
        self.arrived_cv.notify_all();
        while *arrived < self.rendezvous {
            if self
                .arrived_cv
                .wait_for(&mut arrived, Duration::from_secs(5))
                .timed_out()
            {
                self.rendezvous_timed_out.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}

impl ChangeLogStore for InstrumentedStore {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn append(&self, record: NewRecord) -> StoreResult<RecordId> {
        self.inner.append(record)
    }

    fn query(&self, scope: &Scope) -> StoreResult<Vec<ChangeRecord>> {
        self.inner.query(scope)
    }

    fn mutate_batch(&self, ids: &[RecordId], direction: Direction) -> StoreResult<usize> {
        let world = ids
            .first()
            .and_then(|id| self.inner.get(*id))
            .map(|record| record.world)
            .unwrap_or_default();

        self.push(Event::Enter(world.clone()));
        if self.rendezvous > 0 {
            self.wait_for_peers();
        }
        std::thread::sleep(self.delay);
        let result = self.inner.mutate_batch(ids, direction);
        self.push(Event::Exit(world));
        result
    }

    fn purge_older_than(&self, timestamp: Timestamp) -> StoreResult<usize> {
        self.inner.purge_older_than(timestamp)
    }

    fn begin_long_transaction(&self) -> StoreResult<()> {
        self.push(Event::Begin);
        Ok(())
    }

    fn commit_and_reopen(&self) -> StoreResult<()> {
        let failing = self
            .fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::TransactionAborted("injected".into()));
        }
        self.push(Event::Commit);
        Ok(())
    }

    fn end_long_transaction(&self) -> StoreResult<()> {
        self.push(Event::End);
        Ok(())
    }
}

pub fn block_change(
    world: &str,
    pos: BlockPos,
    timestamp: Timestamp,
    action: Action,
    old: BlockState,
    new: BlockState,
) -> NewRecord {
    NewRecord {
        timestamp,
        world: world.to_string(),
        pos,
        action,
        actor: Actor::player("Griefer"),
        old_state: State::Block(old),
        new_state: State::Block(new),
        linked_position: None,
    }
}
