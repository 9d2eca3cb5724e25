//! World mutation contract used by rollback and restore.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use thiserror::Error;

use crate::record::{BlockPos, BlockState, EntitySnapshot, ItemStack};

/// A single change to apply to a world.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorldEdit {
    SetBlock { pos: BlockPos, state: BlockState },
    SetSlot { pos: BlockPos, slot: u16, item: ItemStack },
    SpawnEntity { pos: BlockPos, entity: EntitySnapshot },
    RemoveEntity { pos: BlockPos, entity: EntitySnapshot },
}

impl WorldEdit {
    #[must_use]
    pub fn pos(&self) -> BlockPos {
        match self {
            Self::SetBlock { pos, .. }
            | Self::SetSlot { pos, .. }
            | Self::SpawnEntity { pos, .. }
            | Self::RemoveEntity { pos, .. } => *pos,
        }
    }
}

/// The world rejected an edit batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("world '{0}' is not loaded")]
    WorldNotLoaded(String),

    #[error("no container at {0}")]
    NoContainer(BlockPos),
}

/// Applies ordered edit batches to the game world.
///
/// Implementations receive the complete batch of one rollback/restore at
/// once, in processing order, and either apply all of it or return an error
/// without applying anything.
pub trait WorldEditor: Send + Sync {
    fn apply(&self, world: &str, edits: &[WorldEdit]) -> Result<(), WorldError>;
}

/// Most recent edits kept by [`MemoryWorld::edit_log`].
pub const EDIT_LOG_CAPACITY: usize = 4096;

/// A world kept in memory: blocks, container slots and entities.
///
/// The last [`EDIT_LOG_CAPACITY`] applied edits are kept in an edit log so
/// callers can observe application order.
#[derive(Default)]
pub struct MemoryWorld {
    inner: Mutex<MemoryWorldInner>,
}

#[derive(Default)]
struct MemoryWorldInner {
    blocks: HashMap<(String, BlockPos), BlockState>,
    slots: HashMap<(String, BlockPos, u16), ItemStack>,
    entities: HashMap<uuid::Uuid, (String, BlockPos, EntitySnapshot)>,
    containers: Vec<(String, BlockPos)>,
    unloaded: Vec<String>,
    log: VecDeque<(String, WorldEdit)>,
}

impl MemoryWorld {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block at a position (air if never set).
    #[must_use]
    pub fn block(&self, world: &str, pos: BlockPos) -> BlockState {
        self.inner
            .lock()
            .blocks
            .get(&(world.to_string(), pos))
            .copied()
            .unwrap_or(BlockState::AIR)
    }

    pub fn set_block(&self, world: &str, pos: BlockPos, state: BlockState) {
        self.inner
            .lock()
            .blocks
            .insert((world.to_string(), pos), state);
    }

    /// Mark a position as holding a container.
    pub fn add_container(&self, world: &str, pos: BlockPos) {
        self.inner.lock().containers.push((world.to_string(), pos));
    }

    #[must_use]
    pub fn slot(&self, world: &str, pos: BlockPos, slot: u16) -> ItemStack {
        self.inner
            .lock()
            .slots
            .get(&(world.to_string(), pos, slot))
            .copied()
            .unwrap_or(ItemStack::EMPTY)
    }

    pub fn set_slot(&self, world: &str, pos: BlockPos, slot: u16, item: ItemStack) {
        self.inner
            .lock()
            .slots
            .insert((world.to_string(), pos, slot), item);
    }

    #[must_use]
    pub fn has_entity(&self, uuid: uuid::Uuid) -> bool {
        self.inner.lock().entities.contains_key(&uuid)
    }

    pub fn add_entity(&self, world: &str, pos: BlockPos, entity: EntitySnapshot) {
        self.inner
            .lock()
            .entities
            .insert(entity.uuid, (world.to_string(), pos, entity));
    }

    /// Make every later batch for `world` fail.
    pub fn unload(&self, world: &str) {
        self.inner.lock().unloaded.push(world.to_string());
    }

    /// Recently applied edits, oldest first.
    #[must_use]
    pub fn edit_log(&self) -> Vec<(String, WorldEdit)> {
        self.inner.lock().log.iter().cloned().collect()
    }
}

impl WorldEditor for MemoryWorld {
    fn apply(&self, world: &str, edits: &[WorldEdit]) -> Result<(), WorldError> {
        let mut inner = self.inner.lock();
        if inner.unloaded.iter().any(|w| w == world) {
            return Err(WorldError::WorldNotLoaded(world.to_string()));
        }

        // Validate first so a rejected batch leaves nothing behind.
        for edit in edits {
            if let WorldEdit::SetSlot { pos, .. } = edit {
                if !inner
                    .containers
                    .iter()
                    .any(|(w, p)| w == world && p == pos)
                {
                    return Err(WorldError::NoContainer(*pos));
                }
            }
        }

        for edit in edits {
            match edit {
                WorldEdit::SetBlock { pos, state } => {
                    inner.blocks.insert((world.to_string(), *pos), *state);
                }
                WorldEdit::SetSlot { pos, slot, item } => {
                    inner.slots.insert((world.to_string(), *pos, *slot), *item);
                }
                WorldEdit::SpawnEntity { pos, entity } => {
                    inner
                        .entities
                        .insert(entity.uuid, (world.to_string(), *pos, entity.clone()));
                }
                WorldEdit::RemoveEntity { entity, .. } => {
                    inner.entities.remove(&entity.uuid);
                }
            }
            if inner.log.len() == EDIT_LOG_CAPACITY {
                inner.log.pop_front();
            }
            inner.log.push_back((world.to_string(), edit.clone()));
        }
        Ok(())
    }
}
