//! Change records and the state snapshots they carry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned record identifier (monotonically increasing).
pub type RecordId = u64;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Integer block coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Offset by `dy` blocks vertically.
    #[must_use]
    pub const fn up(self, dy: i32) -> Self {
        Self {
            x: self.x,
            y: self.y + dy,
            z: self.z,
        }
    }

    /// Whether `other` lies inside the cube of half-extent `radius` centred here.
    #[must_use]
    pub fn within(self, other: Self, radius: u32) -> bool {
        let r = i64::from(radius);
        (i64::from(self.x) - i64::from(other.x)).abs() <= r
            && (i64::from(self.y) - i64::from(other.y)).abs() <= r
            && (i64::from(self.z) - i64::from(other.z)).abs() <= r
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.x, self.y, self.z)
    }
}

/// A block position qualified by the world it lives in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldPos {
    pub world: String,
    pub pos: BlockPos,
}

impl WorldPos {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            pos: BlockPos::new(x, y, z),
        }
    }
}

impl fmt::Display for WorldPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.world, self.pos)
    }
}

/// What kind of change a record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    BlockPlace,
    BlockBreak,
    BlockClick,
    ContainerSlotChange,
    EntitySpawn,
    EntityDespawn,
    EntityKill,
    LiquidFlow,
}

impl Action {
    pub const ALL: [Self; 8] = [
        Self::BlockPlace,
        Self::BlockBreak,
        Self::BlockClick,
        Self::ContainerSlotChange,
        Self::EntitySpawn,
        Self::EntityDespawn,
        Self::EntityKill,
        Self::LiquidFlow,
    ];

    /// Past-tense verb used in lookup output.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::BlockPlace => "placed",
            Self::BlockBreak => "broke",
            Self::BlockClick => "clicked",
            Self::ContainerSlotChange => "changed",
            Self::EntitySpawn => "spawned",
            Self::EntityDespawn => "despawned",
            Self::EntityKill => "killed",
            Self::LiquidFlow => "flowed into",
        }
    }

    /// Whether rollback/restore acts on this kind of record.
    ///
    /// Clicks are informational only.
    #[must_use]
    pub const fn is_reversible(self) -> bool {
        !matches!(self, Self::BlockClick)
    }

    #[must_use]
    pub const fn is_entity(self) -> bool {
        matches!(
            self,
            Self::EntitySpawn | Self::EntityDespawn | Self::EntityKill
        )
    }
}

/// Who caused a change.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    /// A named player.
    Player(String),
    /// A game mechanic or entity type (`lava`, `creeper`, ...).
    Environment(String),
}

impl Actor {
    pub fn player(name: impl Into<String>) -> Self {
        Self::Player(name.into())
    }

    pub fn environment(name: impl Into<String>) -> Self {
        Self::Environment(name.into())
    }

    /// Name as typed in `u=` filters (environment actors carry a `#` prefix).
    #[must_use]
    pub fn filter_name(&self) -> String {
        match self {
            Self::Player(name) => name.to_lowercase(),
            Self::Environment(name) => format!("#{}", name.to_lowercase()),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player(name) => f.write_str(name),
            Self::Environment(name) => write!(f, "#{name}"),
        }
    }
}

/// Block id plus auxiliary data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockState {
    pub id: u16,
    pub meta: u8,
}

impl BlockState {
    pub const AIR: Self = Self { id: 0, meta: 0 };

    #[must_use]
    pub const fn new(id: u16, meta: u8) -> Self {
        Self { id, meta }
    }
}

/// An item stack held in a container slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    pub id: u16,
    pub meta: u16,
    pub count: u8,
}

impl ItemStack {
    pub const EMPTY: Self = Self {
        id: 0,
        meta: 0,
        count: 0,
    };

    #[must_use]
    pub const fn new(id: u16, meta: u16, count: u8) -> Self {
        Self { id, meta, count }
    }
}

/// Enough of an entity to recreate it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub uuid: uuid::Uuid,
    pub kind: String,
    /// Opaque serialized entity data (NBT or similar).
    pub data: Vec<u8>,
}

impl EntitySnapshot {
    pub fn new(kind: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4(),
            kind: kind.into(),
            data,
        }
    }
}

/// One side of a recorded transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Block(BlockState),
    Slot { slot: u16, item: ItemStack },
    Entity(EntitySnapshot),
    /// Nothing there (e.g. the "before" of an entity spawn).
    Absent,
}

impl State {
    /// Block or item id this state refers to, if any.
    #[must_use]
    pub fn type_id(&self) -> Option<(u16, u16)> {
        match self {
            Self::Block(block) => Some((block.id, u16::from(block.meta))),
            Self::Slot { item, .. } => Some((item.id, item.meta)),
            Self::Entity(_) | Self::Absent => None,
        }
    }
}

/// Direction of a batch operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Rollback,
    Restore,
}

impl Direction {
    /// Flag value a record must carry to be eligible for this direction.
    #[must_use]
    pub const fn eligible_flag(self) -> bool {
        matches!(self, Self::Restore)
    }

    /// Flag value a record carries after being processed in this direction.
    #[must_use]
    pub const fn resulting_flag(self) -> bool {
        matches!(self, Self::Rollback)
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Rollback => Self::Restore,
            Self::Restore => Self::Rollback,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rollback => "rollback",
            Self::Restore => "restore",
        }
    }

    /// What happened to each affected change, for operator replies.
    #[must_use]
    pub const fn past_tense(self) -> &'static str {
        match self {
            Self::Rollback => "rolled back",
            Self::Restore => "restored",
        }
    }
}

/// A record as produced by a capture site, before the store assigns an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub timestamp: Timestamp,
    pub world: String,
    pub pos: BlockPos,
    pub action: Action,
    pub actor: Actor,
    pub old_state: State,
    pub new_state: State,
    pub linked_position: Option<BlockPos>,
}

impl NewRecord {
    /// Attach the store-assigned id.
    #[must_use]
    pub fn into_record(self, id: RecordId) -> ChangeRecord {
        ChangeRecord {
            id,
            timestamp: self.timestamp,
            world: self.world,
            pos: self.pos,
            action: self.action,
            actor: self.actor,
            old_state: self.old_state,
            new_state: self.new_state,
            linked_position: self.linked_position,
            rolled_back: false,
        }
    }
}

/// One logged historical mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: RecordId,
    pub timestamp: Timestamp,
    pub world: String,
    pub pos: BlockPos,
    pub action: Action,
    pub actor: Actor,
    pub old_state: State,
    pub new_state: State,
    pub linked_position: Option<BlockPos>,
    pub rolled_back: bool,
}

impl ChangeRecord {
    /// State to write back when processing in `direction`.
    #[must_use]
    pub fn target_state(&self, direction: Direction) -> &State {
        match direction {
            Direction::Rollback => &self.old_state,
            Direction::Restore => &self.new_state,
        }
    }

    /// State the world holds before processing in `direction`.
    #[must_use]
    pub fn current_state(&self, direction: Direction) -> &State {
        match direction {
            Direction::Rollback => &self.new_state,
            Direction::Restore => &self.old_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_is_a_cube() {
        let origin = BlockPos::new(0, 64, 0);
        assert!(origin.within(BlockPos::new(5, 69, -5), 5));
        assert!(!origin.within(BlockPos::new(6, 64, 0), 5));
        assert!(!origin.within(BlockPos::new(0, 58, 0), 5));
        assert!(origin.within(origin, 0));
    }

    #[test]
    fn test_direction_flags() {
        assert!(!Direction::Rollback.eligible_flag());
        assert!(Direction::Rollback.resulting_flag());
        assert!(Direction::Restore.eligible_flag());
        assert!(!Direction::Restore.resulting_flag());
        assert_eq!(Direction::Rollback.opposite(), Direction::Restore);
    }

    #[test]
    fn test_actor_filter_name() {
        assert_eq!(Actor::player("Steve").filter_name(), "steve");
        assert_eq!(Actor::environment("Lava").filter_name(), "#lava");
        assert_eq!(Actor::environment("lava").to_string(), "#lava");
    }
}
