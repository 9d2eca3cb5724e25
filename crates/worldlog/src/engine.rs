//! Rollback and restore engine.
//!
//! An invocation runs in two phases on its own worker thread:
//!
//! ```text
//! 1. select   query eligible records (flag not yet flipped in this
//!             direction), order them, plan one world edit per record
//! 2. commit   flip every selected flag in one store transaction, then hand
//!             the whole edit batch to the world; if the world refuses it the
//!             flags are flipped back
//! ```
//!
//! Only one invocation per world may be in flight at a time; a second one
//! for the same world fails immediately with
//! [`EngineError::ConcurrentOperationInProgress`]. Different worlds run in
//! parallel.
//!
//! Completion is reported exactly once, either through the callback pair of
//! [`RollbackEngine::execute_with`] or through the [`Completion`] token
//! returned by [`RollbackEngine::execute`].

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::ADMIN_TARGET;
use crate::filter::{Filter, Scope};
use crate::record::{BlockState, ChangeRecord, Direction, RecordId, State, WorldPos};
use crate::store::{ChangeLogStore, StoreError};
use crate::time::unix_now;
use crate::world::{WorldEdit, WorldEditor, WorldError};

/// Rollback/restore failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Another rollback/restore is running in the same world.
    #[error("a rollback or restore is already running in world '{world}'")]
    ConcurrentOperationInProgress { world: String },

    /// The filter carried no time bound.
    #[error("rollback and restore require a time bound")]
    MissingTimeBound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    World(#[from] WorldError),

    /// The worker thread could not be started or panicked.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    /// Message safe to show to the operator.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ConcurrentOperationInProgress { world } => format!(
                "A rollback or restore is already running in \"{world}\". Try again later or narrow the filter."
            ),
            Self::MissingTimeBound => "You must specify a time (t=...).".to_string(),
            Self::Store(_) | Self::World(_) | Self::Worker(_) => {
                "An error occurred while processing the request. Check the console.".to_string()
            }
        }
    }
}

/// Receiving side of one invocation's terminal signal.
pub struct Completion {
    rx: Receiver<Result<usize, EngineError>>,
}

impl Completion {
    /// Block until the invocation finishes.
    pub fn wait(self) -> Result<usize, EngineError> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(EngineError::Worker("completion dropped".to_string())))
    }

    /// Wait up to `timeout`; `None` if still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<usize, EngineError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(Err(EngineError::Worker("completion dropped".to_string())))
            }
        }
    }

    /// Non-blocking poll.
    pub fn try_result(&self) -> Option<Result<usize, EngineError>> {
        self.rx.try_recv().ok()
    }
}

type Callback = Box<dyn FnOnce(Result<usize, EngineError>) + Send>;

/// Holds the terminal callback; whoever takes it first fires it.
#[derive(Clone)]
struct Terminal(Arc<Mutex<Option<Callback>>>);

impl Terminal {
    fn new(callback: Callback) -> Self {
        Self(Arc::new(Mutex::new(Some(callback))))
    }

    fn finish(&self, result: Result<usize, EngineError>) {
        let callback = self.0.lock().take();
        if let Some(callback) = callback {
            callback(result);
        }
    }
}

/// Drives rollback and restore over a store and a world.
#[derive(Clone)]
pub struct RollbackEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn ChangeLogStore>,
    world: Arc<dyn WorldEditor>,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a world busy for as long as it lives.
struct WorldGuard {
    inner: Arc<EngineInner>,
    world: String,
}

impl WorldGuard {
    fn acquire(inner: &Arc<EngineInner>, world: &str) -> Result<Self, EngineError> {
        if !inner.in_flight.lock().insert(world.to_string()) {
            return Err(EngineError::ConcurrentOperationInProgress {
                world: world.to_string(),
            });
        }
        Ok(Self {
            inner: Arc::clone(inner),
            world: world.to_string(),
        })
    }
}

impl Drop for WorldGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.world);
    }
}

impl RollbackEngine {
    pub fn new(store: Arc<dyn ChangeLogStore>, world: Arc<dyn WorldEditor>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                world,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Whether an invocation is currently running in `world`.
    #[must_use]
    pub fn is_busy(&self, world: &str) -> bool {
        self.inner.in_flight.lock().contains(world)
    }

    /// Start an invocation and return its completion token.
    pub fn execute(&self, origin: WorldPos, filter: Filter, direction: Direction) -> Completion {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.execute_then(origin, filter, direction, move |result| {
            let _ = tx.send(result);
        });
        Completion { rx }
    }

    /// Start an invocation; exactly one of the callbacks fires exactly once.
    pub fn execute_with<S, E>(
        &self,
        origin: WorldPos,
        filter: Filter,
        direction: Direction,
        on_success: S,
        on_error: E,
    ) where
        S: FnOnce(usize) + Send + 'static,
        E: FnOnce(EngineError) + Send + 'static,
    {
        self.execute_then(origin, filter, direction, move |result| match result {
            Ok(affected) => on_success(affected),
            Err(err) => on_error(err),
        });
    }

    /// Start an invocation; `done` fires exactly once with the outcome.
    ///
    /// Never blocks on store or world I/O. Validation failures (missing time
    /// bound, world busy) fire `done` before this returns; everything else
    /// fires on the worker thread.
    pub fn execute_then<F>(&self, origin: WorldPos, filter: Filter, direction: Direction, done: F)
    where
        F: FnOnce(Result<usize, EngineError>) + Send + 'static,
    {
        let terminal = Terminal::new(Box::new(done));

        if filter.time_since().is_none() {
            terminal.finish(Err(EngineError::MissingTimeBound));
            return;
        }

        let guard = match WorldGuard::acquire(&self.inner, &origin.world) {
            Ok(guard) => guard,
            Err(err) => {
                debug!("Refused {} in busy world {}", direction.name(), origin.world);
                terminal.finish(Err(err));
                return;
            }
        };

        let inner = Arc::clone(&self.inner);
        let worker_terminal = terminal.clone();
        let spawned = thread::Builder::new()
            .name(format!("worldlog-{}", direction.name()))
            .spawn(move || {
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| inner.run(&origin, &filter, direction)))
                        .unwrap_or_else(|_| Err(EngineError::Worker("worker panicked".to_string())));
                drop(guard);
                worker_terminal.finish(result);
            });

        if let Err(err) = spawned {
            error!(target: ADMIN_TARGET, "Failed to spawn {} worker: {err}", direction.name());
            terminal.finish(Err(EngineError::Worker(err.to_string())));
        }
    }
}

impl EngineInner {
    fn run(
        &self,
        origin: &WorldPos,
        filter: &Filter,
        direction: Direction,
    ) -> Result<usize, EngineError> {
        let started = Instant::now();

        // Phase 1: select and plan.
        let scope = Scope::new(filter.clone(), Some(origin), unix_now())
            .with_rolled_back(direction.eligible_flag())
            .reversible_only();
        let mut records = self.store.query(&scope)?;
        if records.is_empty() {
            debug!("Nothing to {} in {}", direction.name(), origin.world);
            return Ok(0);
        }
        order(&mut records, direction);

        let ids: Vec<RecordId> = records.iter().map(|record| record.id).collect();
        let edits: Vec<WorldEdit> = records
            .iter()
            .flat_map(|record| {
                plan_edit(record, direction)
                    .into_iter()
                    .chain(plan_linked(record, direction))
            })
            .collect();

        // Phase 2: commit flags, then apply.
        let affected = self.store.mutate_batch(&ids, direction)?;
        if let Err(err) = self.world.apply(&origin.world, &edits) {
            if let Err(undo) = self.store.mutate_batch(&ids, direction.opposite()) {
                error!(
                    target: ADMIN_TARGET,
                    "World refused {} batch and reverting {} flags failed: {undo}",
                    direction.name(),
                    ids.len()
                );
            }
            return Err(err.into());
        }

        info!(
            "{} of {} records in {} took {:.1}s",
            direction.name(),
            affected,
            origin.world,
            started.elapsed().as_secs_f64()
        );
        Ok(affected)
    }
}

/// Rollback unwinds newest-first, restore replays oldest-first.
fn order(records: &mut [ChangeRecord], direction: Direction) {
    match direction {
        Direction::Rollback => {
            records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        }
        Direction::Restore => {
            records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        }
    }
}

/// The world edit that moves `record` across its transition in `direction`.
fn plan_edit(record: &ChangeRecord, direction: Direction) -> Option<WorldEdit> {
    let pos = record.pos;
    match record.target_state(direction) {
        State::Block(state) => Some(WorldEdit::SetBlock { pos, state: *state }),
        State::Slot { slot, item } => Some(WorldEdit::SetSlot {
            pos,
            slot: *slot,
            item: *item,
        }),
        State::Entity(entity) => Some(WorldEdit::SpawnEntity {
            pos,
            entity: entity.clone(),
        }),
        State::Absent => match record.current_state(direction) {
            State::Entity(entity) => Some(WorldEdit::RemoveEntity {
                pos,
                entity: entity.clone(),
            }),
            State::Block(_) => Some(WorldEdit::SetBlock {
                pos,
                state: BlockState::AIR,
            }),
            State::Slot { .. } | State::Absent => None,
        },
    }
}

/// A bucket drains its linked tile along with the clicked one.
fn plan_linked(record: &ChangeRecord, direction: Direction) -> Option<WorldEdit> {
    let pos = record.linked_position?;
    let State::Block(state) = record.target_state(direction) else {
        return None;
    };
    Some(WorldEdit::SetBlock { pos, state: *state })
}
