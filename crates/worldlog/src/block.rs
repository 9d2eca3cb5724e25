//! Block name registry.
//!
//! Maps human-readable block names to the legacy numeric ids stored in
//! records. Names are matched case-insensitively and may carry a
//! `minecraft:` namespace prefix; bare numeric ids are accepted as-is.

use std::collections::HashMap;

use crate::record::BlockState;

/// Legacy block ids known out of the box.
const DEFAULT_BLOCKS: &[(&str, u16)] = &[
    ("air", 0),
    ("stone", 1),
    ("grass", 2),
    ("dirt", 3),
    ("cobblestone", 4),
    ("planks", 5),
    ("sapling", 6),
    ("bedrock", 7),
    ("flowing_water", 8),
    ("water", 9),
    ("flowing_lava", 10),
    ("lava", 11),
    ("sand", 12),
    ("gravel", 13),
    ("gold_ore", 14),
    ("iron_ore", 15),
    ("coal_ore", 16),
    ("log", 17),
    ("leaves", 18),
    ("sponge", 19),
    ("glass", 20),
    ("lapis_ore", 21),
    ("lapis_block", 22),
    ("dispenser", 23),
    ("sandstone", 24),
    ("noteblock", 25),
    ("bed", 26),
    ("wool", 35),
    ("gold_block", 41),
    ("iron_block", 42),
    ("brick_block", 45),
    ("tnt", 46),
    ("bookshelf", 47),
    ("mossy_cobblestone", 48),
    ("obsidian", 49),
    ("torch", 50),
    ("fire", 51),
    ("chest", 54),
    ("diamond_ore", 56),
    ("diamond_block", 57),
    ("crafting_table", 58),
    ("furnace", 61),
    ("wooden_door", 64),
    ("ladder", 65),
    ("lever", 69),
    ("stone_button", 77),
    ("ice", 79),
    ("snow", 80),
    ("cactus", 81),
    ("pumpkin", 86),
    ("netherrack", 87),
    ("glowstone", 89),
    ("trapdoor", 96),
    ("stonebrick", 98),
    ("glass_pane", 102),
    ("fence_gate", 107),
    ("enchanting_table", 116),
    ("emerald_block", 133),
    ("wooden_button", 143),
    ("trapped_chest", 146),
    ("hopper", 154),
    ("quartz_block", 155),
    ("shulker_box", 205),
];

/// A block type reference as written in a filter (`stone`, `dirt:1`, `2:0`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockSpec {
    pub id: u16,
    /// `None` matches every auxiliary value.
    pub meta: Option<u16>,
}

impl BlockSpec {
    /// Whether a `(id, meta)` pair taken from a record matches this spec.
    #[must_use]
    pub fn matches(self, id: u16, meta: u16) -> bool {
        self.id == id && self.meta.is_none_or(|m| m == meta)
    }

    /// The concrete state this spec places, aux value defaulting to 0.
    ///
    /// `None` when the aux value does not fit a block state.
    #[must_use]
    pub fn to_state(self) -> Option<BlockState> {
        let meta = u8::try_from(self.meta.unwrap_or(0)).ok()?;
        Some(BlockState::new(self.id, meta))
    }
}

/// Name to id lookup table.
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    by_name: HashMap<String, u16>,
    by_id: HashMap<u16, String>,
}

impl BlockRegistry {
    /// An empty registry (only numeric ids resolve).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Registry preloaded with the legacy vanilla block table.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for (name, id) in DEFAULT_BLOCKS {
            registry.register(name, *id);
        }
        registry
    }

    /// Register (or override) a block name.
    pub fn register(&mut self, name: &str, id: u16) {
        let name = normalize(name);
        self.by_id.entry(id).or_insert_with(|| name.clone());
        self.by_name.insert(name, id);
    }

    /// Resolve a block name or numeric id.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<u16> {
        if let Ok(id) = name.parse::<u16>() {
            return Some(id);
        }
        self.by_name.get(&normalize(name)).copied()
    }

    /// Parse `name` or `name:aux`.
    #[must_use]
    pub fn parse_spec(&self, input: &str) -> Option<BlockSpec> {
        let input = input.trim();
        let input = input.strip_prefix("minecraft:").unwrap_or(input);
        let (name, meta) = match input.split_once(':') {
            Some((name, meta)) => (name, Some(meta.parse::<u16>().ok()?)),
            None => (input, None),
        };
        if name.is_empty() {
            return None;
        }
        let id = self.resolve(name)?;
        Some(BlockSpec { id, meta })
    }

    /// Display name for an id, falling back to the number.
    #[must_use]
    pub fn name_of(&self, id: u16) -> String {
        self.by_id
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn normalize(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_prefix("minecraft:") {
        Some(rest) => rest.replace(' ', "_"),
        None => name.replace(' ', "_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_names() {
        let registry = BlockRegistry::with_defaults();
        assert_eq!(registry.resolve("stone"), Some(1));
        assert_eq!(registry.resolve("STONE"), Some(1));
        assert_eq!(registry.resolve("minecraft:dirt"), Some(3));
        assert_eq!(registry.resolve("42"), Some(42));
        assert_eq!(registry.resolve("unobtainium"), None);
    }

    #[test]
    fn test_parse_spec_with_aux() {
        let registry = BlockRegistry::with_defaults();
        assert_eq!(
            registry.parse_spec("dirt:0"),
            Some(BlockSpec {
                id: 3,
                meta: Some(0)
            })
        );
        assert_eq!(registry.parse_spec("2:0").map(|s| s.id), Some(2));
        assert_eq!(registry.parse_spec("glass").and_then(|s| s.meta), None);
        assert_eq!(registry.parse_spec("dirt:x"), None);
        assert_eq!(registry.parse_spec(":1"), None);
    }

    #[test]
    fn test_spec_to_state() {
        let registry = BlockRegistry::with_defaults();
        let spec = |input: &str| registry.parse_spec(input).and_then(BlockSpec::to_state);
        assert_eq!(spec("dirt"), Some(BlockState::new(3, 0)));
        assert_eq!(spec("wool:14"), Some(BlockState::new(35, 14)));
        assert_eq!(spec("dirt:300"), None);
    }

    #[test]
    fn test_spec_matching() {
        let any_wool = BlockSpec { id: 35, meta: None };
        let red_wool = BlockSpec {
            id: 35,
            meta: Some(14),
        };
        assert!(any_wool.matches(35, 3));
        assert!(red_wool.matches(35, 14));
        assert!(!red_wool.matches(35, 3));
        assert!(!any_wool.matches(1, 0));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = BlockRegistry::empty();
        registry.register("Reactor Core", 900);
        assert_eq!(registry.resolve("reactor_core"), Some(900));
        assert_eq!(registry.name_of(900), "reactor_core");
        assert_eq!(registry.name_of(901), "901");
    }
}
