//! Block, container and entity change log with lookup, rollback and restore.
//!
//! Every change to a world tile, container slot or entity is appended to a
//! [`ChangeLogStore`] as a [`ChangeRecord`]. Operators query that log, and
//! the [`RollbackEngine`] replays it backwards (rollback) or forwards
//! (restore) against a [`WorldEditor`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  append   ┌──────────────────┐   commit/reopen   ┌──────────────────┐
//! │  Recorder    │ ────────▶ │  ChangeLogStore  │ ◀──────────────── │ TransactionBatcher│
//! └──────────────┘           └──────────────────┘                   └──────────────────┘
//!                              ▲ query    ▲ mutate_batch
//! ┌──────────────┐   Filter    │          │
//! │  Commands    │ ────────────┴───▶ RollbackEngine ───▶ WorldEditor
//! └──────────────┘
//!        │ page
//!        ▼
//! SessionRegistry / InspectionCache
//! ```
//!
//! There is no global state: everything hangs off a [`Context`] built once
//! at startup and passed to whoever needs it.
//!
//! # Usage
//!
//! ```ignore
//! use worldlog::{Config, Context, MemoryStore, MemoryWorld};
//!
//! let ctx = Context::new(Config::default(), Arc::new(MemoryStore::new()), Arc::new(MemoryWorld::new()));
//! ctx.recorder.block_break(&Actor::player("Steve"), &WorldPos::new("world", 0, 64, 0), stone);
//! ```

pub mod batcher;
pub mod block;
pub mod commands;
pub mod config;
pub mod engine;
pub mod filter;
pub mod inspect;
pub mod record;
pub mod recorder;
pub mod store;
pub mod time;
pub mod world;

use std::sync::Arc;

pub use batcher::TransactionBatcher;
pub use block::{BlockRegistry, BlockSpec};
pub use commands::{Commands, Response};
pub use config::{BackendKind, Config, ConfigError, Tracking};
pub use engine::{Completion, EngineError, RollbackEngine};
pub use filter::{Field, Filter, FilterParser, ParseError, Scope};
pub use inspect::{InspectionCache, Operator, Page, PageError, SessionRegistry};
pub use record::{
    Action, Actor, BlockPos, BlockState, ChangeRecord, Direction, EntitySnapshot, ItemStack,
    NewRecord, RecordId, State, Timestamp, WorldPos,
};
pub use recorder::Recorder;
pub use store::{Backend, ChangeLogStore, MemoryStore, StoreError, StoreResult};
pub use world::{MemoryWorld, WorldEdit, WorldEditor, WorldError};

/// Tracing target for raw internal errors meant for administrators.
pub const ADMIN_TARGET: &str = "worldlog::admin";

/// Shared handles for one running instance.
pub struct Context {
    pub config: Arc<Config>,
    pub blocks: Arc<BlockRegistry>,
    pub store: Arc<dyn ChangeLogStore>,
    pub engine: RollbackEngine,
    pub sessions: Arc<SessionRegistry>,
    pub recorder: Recorder,
}

impl Context {
    pub fn new(
        config: Config,
        store: Arc<dyn ChangeLogStore>,
        world: Arc<dyn WorldEditor>,
    ) -> Self {
        let blocks = Arc::new(config.block_registry());
        let config = Arc::new(config);
        Self {
            engine: RollbackEngine::new(Arc::clone(&store), world),
            recorder: Recorder::new(Arc::clone(&store), Arc::clone(&config)),
            sessions: Arc::new(SessionRegistry::new()),
            blocks,
            config,
            store,
        }
    }

    /// Parser bound to this instance's block table and radius limit.
    #[must_use]
    pub fn parser(&self) -> FilterParser<'_> {
        FilterParser::new(&self.blocks, self.config.max_radius)
    }
}
