//! Query scopes: what a lookup, rollback or restore operates on.
//!
//! A [`Filter`] is the validated, origin-independent part of a command
//! (time window, radius, actors, actions, block types). A [`Scope`] binds a
//! filter to a world, an origin and the current time, and is what stores
//! evaluate against each record.

mod parser;

use std::collections::BTreeSet;

pub use parser::{Field, FilterParser, ParseError, parse_duration};

use crate::block::BlockSpec;
use crate::record::{Action, BlockPos, ChangeRecord, Timestamp, WorldPos};

/// Validated query/mutation scope built from one command invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    time_since: Option<u64>,
    radius: Option<u32>,
    actors: Option<BTreeSet<String>>,
    actions: Option<BTreeSet<Action>>,
    include_blocks: Option<Vec<BlockSpec>>,
    exclude_blocks: Option<Vec<BlockSpec>>,
}

impl Filter {
    /// A filter matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_time_since(mut self, seconds: u64) -> Self {
        self.time_since = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_radius(mut self, radius: u32) -> Self {
        self.radius = Some(radius);
        self
    }

    #[must_use]
    pub fn with_actors<I, S>(mut self, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.actors = Some(
            actors
                .into_iter()
                .map(|a| a.as_ref().to_lowercase())
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn with_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.actions = Some(actions.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_include_blocks(mut self, blocks: Vec<BlockSpec>) -> Self {
        self.include_blocks = Some(blocks);
        self
    }

    #[must_use]
    pub fn with_exclude_blocks(mut self, blocks: Vec<BlockSpec>) -> Self {
        self.exclude_blocks = Some(blocks);
        self
    }

    /// Lower time bound in seconds before now.
    #[must_use]
    pub fn time_since(&self) -> Option<u64> {
        self.time_since
    }

    #[must_use]
    pub fn radius(&self) -> Option<u32> {
        self.radius
    }

    #[must_use]
    pub fn actors(&self) -> Option<&BTreeSet<String>> {
        self.actors.as_ref()
    }

    #[must_use]
    pub fn actions(&self) -> Option<&BTreeSet<Action>> {
        self.actions.as_ref()
    }

    #[must_use]
    pub fn include_blocks(&self) -> Option<&[BlockSpec]> {
        self.include_blocks.as_deref()
    }

    #[must_use]
    pub fn exclude_blocks(&self) -> Option<&[BlockSpec]> {
        self.exclude_blocks.as_deref()
    }

    /// Actor, action and block-type predicates (no time or position).
    #[must_use]
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        if let Some(actors) = &self.actors {
            if !actors.contains(&record.actor.filter_name()) {
                return false;
            }
        }

        if let Some(actions) = &self.actions {
            if !actions.contains(&record.action) {
                return false;
            }
        }

        let types = [record.old_state.type_id(), record.new_state.type_id()];
        let hits = |specs: &[BlockSpec]| {
            types
                .iter()
                .flatten()
                .any(|&(id, meta)| specs.iter().any(|spec| spec.matches(id, meta)))
        };

        // Exclusion wins over inclusion.
        if let Some(excluded) = &self.exclude_blocks {
            if hits(excluded) {
                return false;
            }
        }

        if let Some(included) = &self.include_blocks {
            if !hits(included) {
                return false;
            }
        }

        true
    }
}

/// A filter bound to a world, an origin and a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    pub filter: Filter,
    /// Restrict to one world (`None` = every world).
    pub world: Option<String>,
    /// Centre of the radius check.
    pub origin: Option<BlockPos>,
    /// Oldest timestamp included.
    pub since: Option<Timestamp>,
    /// Required `rolled_back` flag value.
    pub rolled_back: Option<bool>,
    /// Skip records rollback/restore never touches.
    pub reversible_only: bool,
}

impl Scope {
    /// Bind `filter` to `origin` at time `now`.
    #[must_use]
    pub fn new(filter: Filter, origin: Option<&WorldPos>, now: Timestamp) -> Self {
        let since = filter
            .time_since()
            .map(|secs| now.saturating_sub(i64::try_from(secs).unwrap_or(i64::MAX)));
        Self {
            world: origin.map(|o| o.world.clone()),
            origin: origin.map(|o| o.pos),
            since,
            filter,
            rolled_back: None,
            reversible_only: false,
        }
    }

    /// Every record at exactly one position, regardless of age.
    #[must_use]
    pub fn at(position: &WorldPos) -> Self {
        Self {
            filter: Filter::new().with_radius(0),
            world: Some(position.world.clone()),
            origin: Some(position.pos),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_rolled_back(mut self, flag: bool) -> Self {
        self.rolled_back = Some(flag);
        self
    }

    #[must_use]
    pub fn reversible_only(mut self) -> Self {
        self.reversible_only = true;
        self
    }

    /// Full predicate evaluated by stores.
    #[must_use]
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        if self.reversible_only && !record.action.is_reversible() {
            return false;
        }
        if self.rolled_back.is_some_and(|flag| flag != record.rolled_back) {
            return false;
        }
        if self.since.is_some_and(|since| record.timestamp < since) {
            return false;
        }
        if self.world.as_ref().is_some_and(|w| *w != record.world) {
            return false;
        }
        if let (Some(origin), Some(radius)) = (self.origin, self.filter.radius()) {
            if !origin.within(record.pos, radius) {
                return false;
            }
        }
        self.filter.matches(record)
    }
}
