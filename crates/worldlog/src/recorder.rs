//! Producer-side logging API.
//!
//! Game event handlers call one method per kind of change. The recorder
//! stamps the current time, skips worlds and kinds that are switched off in
//! [`Config`], and appends through the store. Store failures are logged on
//! the admin target and never reach the producer.

use std::sync::Arc;

use tracing::error;

use crate::ADMIN_TARGET;
use crate::config::Config;
use crate::record::{
    Action, Actor, BlockPos, BlockState, EntitySnapshot, ItemStack, NewRecord, RecordId, State,
    WorldPos,
};
use crate::store::ChangeLogStore;
use crate::time::unix_now;

#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn ChangeLogStore>,
    config: Arc<Config>,
}

impl Recorder {
    pub fn new(store: Arc<dyn ChangeLogStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    pub fn block_place(
        &self,
        actor: &Actor,
        at: &WorldPos,
        replaced: BlockState,
        placed: BlockState,
    ) -> Option<RecordId> {
        self.record(
            self.config.tracking.block_place,
            actor,
            at,
            Action::BlockPlace,
            State::Block(replaced),
            State::Block(placed),
            None,
        )
    }

    pub fn block_break(&self, actor: &Actor, at: &WorldPos, broken: BlockState) -> Option<RecordId> {
        self.record(
            self.config.tracking.block_break,
            actor,
            at,
            Action::BlockBreak,
            State::Block(broken),
            State::Block(BlockState::AIR),
            None,
        )
    }

    /// An interaction with a door, lever, button or similar.
    pub fn block_click(&self, actor: &Actor, at: &WorldPos, block: BlockState) -> Option<RecordId> {
        self.record(
            self.config.tracking.player_interactions,
            actor,
            at,
            Action::BlockClick,
            State::Block(block),
            State::Block(block),
            None,
        )
    }

    /// Liquid poured out of a bucket into `at`.
    pub fn bucket_empty(
        &self,
        actor: &Actor,
        at: &WorldPos,
        replaced: BlockState,
        liquid: BlockState,
    ) -> Option<RecordId> {
        self.record(
            self.config.tracking.buckets,
            actor,
            at,
            Action::BlockPlace,
            State::Block(replaced),
            State::Block(liquid),
            None,
        )
    }

    /// Liquid scooped up from `at`.
    ///
    /// `linked` is the adjacent liquid tile that was drained with it when
    /// the bucket was used from above or below.
    pub fn bucket_fill(
        &self,
        actor: &Actor,
        at: &WorldPos,
        liquid: BlockState,
        linked: Option<BlockPos>,
    ) -> Option<RecordId> {
        self.record(
            self.config.tracking.buckets,
            actor,
            at,
            Action::BlockBreak,
            State::Block(liquid),
            State::Block(BlockState::AIR),
            linked,
        )
    }

    pub fn container_slot_change(
        &self,
        actor: &Actor,
        at: &WorldPos,
        slot: u16,
        before: ItemStack,
        after: ItemStack,
    ) -> Option<RecordId> {
        self.record(
            self.config.tracking.item_transactions,
            actor,
            at,
            Action::ContainerSlotChange,
            State::Slot { slot, item: before },
            State::Slot { slot, item: after },
            None,
        )
    }

    pub fn entity_spawn(
        &self,
        actor: &Actor,
        at: &WorldPos,
        entity: &EntitySnapshot,
    ) -> Option<RecordId> {
        self.record(
            self.config.tracking.entity_spawns,
            actor,
            at,
            Action::EntitySpawn,
            State::Absent,
            State::Entity(entity.clone()),
            None,
        )
    }

    pub fn entity_despawn(
        &self,
        actor: &Actor,
        at: &WorldPos,
        entity: &EntitySnapshot,
    ) -> Option<RecordId> {
        self.record(
            self.config.tracking.entity_spawns,
            actor,
            at,
            Action::EntityDespawn,
            State::Entity(entity.clone()),
            State::Absent,
            None,
        )
    }

    pub fn entity_kill(
        &self,
        actor: &Actor,
        at: &WorldPos,
        entity: &EntitySnapshot,
    ) -> Option<RecordId> {
        self.record(
            self.config.tracking.entity_kills,
            actor,
            at,
            Action::EntityKill,
            State::Entity(entity.clone()),
            State::Absent,
            None,
        )
    }

    /// Liquid spreading into `at` on its own.
    pub fn liquid_flow(
        &self,
        source: &Actor,
        at: &WorldPos,
        replaced: BlockState,
        liquid: BlockState,
    ) -> Option<RecordId> {
        self.record(
            self.config.tracking.liquid_flow,
            source,
            at,
            Action::LiquidFlow,
            State::Block(replaced),
            State::Block(liquid),
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        enabled: bool,
        actor: &Actor,
        at: &WorldPos,
        action: Action,
        old_state: State,
        new_state: State,
        linked_position: Option<BlockPos>,
    ) -> Option<RecordId> {
        if !enabled || !self.config.is_world_enabled(&at.world) {
            return None;
        }

        let record = NewRecord {
            timestamp: unix_now(),
            world: at.world.clone(),
            pos: at.pos,
            action,
            actor: actor.clone(),
            old_state,
            new_state,
            linked_position,
        };

        match self.store.append(record) {
            Ok(id) => Some(id),
            Err(err) => {
                error!(target: ADMIN_TARGET, "Failed to log {} at {at}: {err}", action.verb());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Scope;
    use crate::store::MemoryStore;

    fn recorder(config: Config) -> (Arc<MemoryStore>, Recorder) {
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::new(store.clone(), Arc::new(config));
        (store, recorder)
    }

    #[test]
    fn test_records_with_states() {
        let (store, recorder) = recorder(Config::default());
        let steve = Actor::player("Steve");
        let at = WorldPos::new("world", 1, 64, 1);

        let id = recorder
            .block_break(&steve, &at, BlockState::new(1, 0))
            .unwrap();
        let record = store.get(id).unwrap();
        assert_eq!(record.action, Action::BlockBreak);
        assert_eq!(record.old_state, State::Block(BlockState::new(1, 0)));
        assert_eq!(record.new_state, State::Block(BlockState::AIR));
        assert!(!record.rolled_back);
    }

    #[test]
    fn test_bucket_fill_links_adjacent_tile() {
        let (store, recorder) = recorder(Config::default());
        let at = WorldPos::new("world", 0, 60, 0);
        let above = at.pos.up(1);
        let id = recorder
            .bucket_fill(&Actor::player("Alex"), &at, BlockState::new(9, 0), Some(above))
            .unwrap();
        assert_eq!(store.get(id).unwrap().linked_position, Some(above));
    }

    #[test]
    fn test_honours_world_and_tracking_switches() {
        let mut config = Config::default();
        config.enabled_worlds = vec!["world".into()];
        config.tracking.liquid_flow = false;
        let (store, recorder) = recorder(config);
        let lava = Actor::environment("lava");

        let nether = WorldPos::new("nether", 0, 0, 0);
        assert!(recorder.block_break(&lava, &nether, BlockState::new(1, 0)).is_none());

        let here = WorldPos::new("world", 0, 0, 0);
        assert!(
            recorder
                .liquid_flow(&lava, &here, BlockState::AIR, BlockState::new(10, 0))
                .is_none()
        );
        assert!(store.query(&Scope::default()).unwrap().is_empty());
    }
}
