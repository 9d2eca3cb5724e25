//! Filter token parser.
//!
//! Parses `key=value` tokens into a [`Filter`]:
//!
//! ```text
//! t=1h3m10s        time window (required for rollback/restore)
//! r=10             radius around the origin
//! u=Steve,#lava    actors (environment actors start with '#')
//! a=break,place    actions
//! b=stone,dirt:0   only these block types
//! e=glass          never these block types
//! ```

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use super::Filter;
use crate::block::{BlockRegistry, BlockSpec};
use crate::record::Action;

/// Errors produced while parsing filter tokens.
///
/// The `Display` output is meant to be shown to the operator as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A required parameter was not supplied.
    #[error("missing required parameter(s): {0}")]
    MissingParameter(String),

    /// Duration did not follow the `<n>d<n>h<n>m<n>s` grammar.
    #[error("invalid time format '{0}' (expected e.g. 1d2h30m10s)")]
    InvalidTimeFormat(String),

    /// Radius was negative, not a number, or above the maximum.
    #[error("invalid radius '{value}': must be a whole number between 0 and {max}")]
    InvalidRadius { value: String, max: u32 },

    /// Block name did not resolve.
    #[error("unknown block type '{0}'")]
    UnknownBlockType(String),

    /// Action name is not one of the known actions.
    #[error("unknown action '{0}'")]
    UnknownActionName(String),

    /// Token key is not a filter parameter.
    #[error("unknown parameter '{0}'")]
    UnknownKey(String),

    /// Token is not in `key=value` form.
    #[error("malformed parameter '{0}' (expected key=value)")]
    MalformedToken(String),

    /// Same parameter given twice.
    #[error("parameter '{0}' given more than once")]
    DuplicateParameter(String),

    /// A list parameter had nothing after the `=`.
    #[error("parameter '{0}' has no value")]
    EmptyValue(String),
}

/// The filter parameters a command can require.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Time,
    Radius,
    Users,
    Actions,
    Blocks,
    Exclusions,
}

impl Field {
    pub const ALL: [Self; 6] = [
        Self::Time,
        Self::Radius,
        Self::Users,
        Self::Actions,
        Self::Blocks,
        Self::Exclusions,
    ];

    /// Human-readable name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Radius => "radius",
            Self::Users => "user",
            Self::Actions => "action",
            Self::Blocks => "blocks",
            Self::Exclusions => "exclude",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "t" | "time" => Some(Self::Time),
            "r" | "radius" => Some(Self::Radius),
            "u" | "user" | "users" => Some(Self::Users),
            "a" | "action" | "actions" => Some(Self::Actions),
            "b" | "block" | "blocks" => Some(Self::Blocks),
            "e" | "exclude" => Some(Self::Exclusions),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parser bound to a block registry and a radius limit.
#[derive(Clone, Copy, Debug)]
pub struct FilterParser<'a> {
    blocks: &'a BlockRegistry,
    max_radius: u32,
}

impl<'a> FilterParser<'a> {
    #[must_use]
    pub fn new(blocks: &'a BlockRegistry, max_radius: u32) -> Self {
        Self { blocks, max_radius }
    }

    /// Parse `tokens` into a [`Filter`].
    ///
    /// Every field in `required` must be present. With
    /// `require_at_least_one`, at least one recognized field must be given.
    pub fn parse<S: AsRef<str>>(
        &self,
        tokens: &[S],
        required: &[Field],
        require_at_least_one: bool,
    ) -> Result<Filter, ParseError> {
        let mut filter = Filter::new();
        let mut seen = BTreeSet::new();

        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }

            let Some((key, value)) = token.split_once('=') else {
                return Err(ParseError::MalformedToken(token.to_string()));
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            let field = Field::from_key(&key).ok_or(ParseError::UnknownKey(key))?;
            if !seen.insert(field) {
                return Err(ParseError::DuplicateParameter(field.name().to_string()));
            }

            match field {
                Field::Time => filter.time_since = Some(parse_duration(value)?),
                Field::Radius => filter.radius = Some(self.parse_radius(value)?),
                Field::Users => {
                    filter.actors = Some(
                        list(field, value)?
                            .map(str::to_lowercase)
                            .collect(),
                    );
                }
                Field::Actions => {
                    let mut actions = BTreeSet::new();
                    for name in list(field, value)? {
                        actions.extend(parse_action(name)?);
                    }
                    filter.actions = Some(actions);
                }
                Field::Blocks => filter.include_blocks = Some(self.parse_blocks(field, value)?),
                Field::Exclusions => {
                    filter.exclude_blocks = Some(self.parse_blocks(field, value)?);
                }
            }
        }

        let missing: Vec<&str> = required
            .iter()
            .filter(|field| !seen.contains(*field))
            .map(|field| field.name())
            .collect();
        if !missing.is_empty() {
            return Err(ParseError::MissingParameter(missing.join(", ")));
        }

        if require_at_least_one && seen.is_empty() {
            let all: Vec<&str> = Field::ALL.iter().map(|f| f.name()).collect();
            return Err(ParseError::MissingParameter(format!(
                "at least one of {}",
                all.join(", ")
            )));
        }

        Ok(filter)
    }

    fn parse_radius(&self, value: &str) -> Result<u32, ParseError> {
        let invalid = || ParseError::InvalidRadius {
            value: value.to_string(),
            max: self.max_radius,
        };
        let radius = value.parse::<u32>().map_err(|_| invalid())?;
        if radius > self.max_radius {
            return Err(invalid());
        }
        Ok(radius)
    }

    fn parse_blocks(&self, field: Field, value: &str) -> Result<Vec<BlockSpec>, ParseError> {
        list(field, value)?
            .map(|name| {
                self.blocks
                    .parse_spec(name)
                    .ok_or_else(|| ParseError::UnknownBlockType(name.to_string()))
            })
            .collect()
    }
}

/// Split a comma-separated list, rejecting an empty one.
fn list(field: Field, value: &str) -> Result<impl Iterator<Item = &str>, ParseError> {
    if value.split(',').all(|part| part.trim().is_empty()) {
        return Err(ParseError::EmptyValue(field.name().to_string()));
    }
    Ok(value.split(',').map(str::trim).filter(|part| !part.is_empty()))
}

fn parse_action(name: &str) -> Result<Vec<Action>, ParseError> {
    let actions = match name.to_lowercase().as_str() {
        "place" | "+block" => vec![Action::BlockPlace],
        "break" | "-block" => vec![Action::BlockBreak],
        "block" => vec![Action::BlockPlace, Action::BlockBreak],
        "click" => vec![Action::BlockClick],
        "container" | "+container" | "-container" => vec![Action::ContainerSlotChange],
        "spawn" => vec![Action::EntitySpawn],
        "despawn" => vec![Action::EntityDespawn],
        "kill" => vec![Action::EntityKill],
        "flow" => vec![Action::LiquidFlow],
        _ => return Err(ParseError::UnknownActionName(name.to_string())),
    };
    Ok(actions)
}

/// Parse a compound duration (`1d2h3m4s`, any subset, units in that order)
/// into seconds. Zero is rejected.
pub fn parse_duration(input: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::InvalidTimeFormat(input.to_string());

    let mut total: u64 = 0;
    let mut digits = String::new();
    // Rank of the last unit consumed; units must strictly descend.
    let mut last_rank = usize::MAX;
    let mut saw_unit = false;

    for c in input.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let (rank, scale) = match c.to_ascii_lowercase() {
            'd' => (3, 86_400),
            'h' => (2, 3_600),
            'm' => (1, 60),
            's' => (0, 1),
            _ => return Err(invalid()),
        };
        if digits.is_empty() || rank >= last_rank {
            return Err(invalid());
        }

        let amount: u64 = digits.parse().map_err(|_| invalid())?;
        total = amount
            .checked_mul(scale)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;

        digits.clear();
        last_rank = rank;
        saw_unit = true;
    }

    if !saw_unit || !digits.is_empty() || total == 0 {
        return Err(invalid());
    }

    Ok(total)
}
