//! Operator command surface.
//!
//! Turns command text into core calls and answers with [`Response`] lines.
//! Operators only ever see user-facing messages; raw store and engine errors
//! go to [`ADMIN_TARGET`].
//!
//! ```text
//! lookup <filter...>       query, cache and show page 1
//! lookup [<page>[:<lines>]] page through the cached result
//! near [radius]            everything around the operator
//! rollback <filter...>     t= required, answered asynchronously
//! restore <filter...>      t= required, answered asynchronously
//! purge t=<duration>       delete records older than the duration
//! inspect                  toggle inspector mode
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use crate::filter::{Field, Filter, Scope, parse_duration};
use crate::inspect::{Operator, PageError};
use crate::record::{Action, ChangeRecord, Direction, State, WorldPos};
use crate::time::{age, duration, time_ago, unix_now};
use crate::{ADMIN_TARGET, Context};

/// Reply to one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub success: bool,
    pub lines: Vec<String>,
}

impl Response {
    pub fn ok(lines: impl IntoIterator<Item = String>) -> Self {
        Self {
            success: true,
            lines: lines.into_iter().collect(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            lines: vec![message.into()],
        }
    }
}

const USAGE: &str =
    "Usage: lookup | near [radius] | rollback <t=...> | restore <t=...> | purge t=<time> | inspect";

/// Command handlers over a shared [`Context`].
#[derive(Clone)]
pub struct Commands {
    ctx: Arc<Context>,
}

impl Commands {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run one command line issued by `operator` standing at `position`.
    ///
    /// `reply` is called exactly once; for rollback and restore it is called
    /// from the engine's worker thread.
    pub fn dispatch<F>(&self, operator: &Operator, position: &WorldPos, input: &str, reply: F)
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let mut words = input.split_whitespace();
        let Some(command) = words.next() else {
            reply(Response::error(USAGE));
            return;
        };
        let args: Vec<&str> = words.collect();

        match command.to_lowercase().as_str() {
            "lookup" | "l" => reply(self.lookup(operator, position, &args)),
            "near" => reply(self.near(operator, position, &args)),
            "rollback" | "rb" => self.rollback(position, &args, Direction::Rollback, reply),
            "restore" | "rs" => self.rollback(position, &args, Direction::Restore, reply),
            "purge" => reply(self.purge(&args)),
            "inspect" | "i" => reply(self.inspect(operator)),
            _ => reply(Response::error(USAGE)),
        }
    }

    /// Filter lookup, or a page of the cached result.
    pub fn lookup(&self, operator: &Operator, position: &WorldPos, args: &[&str]) -> Response {
        if args.is_empty() {
            return self.render_page(operator, 1, self.ctx.config.lookup_page_size, "Lookup results");
        }
        if let [single] = args {
            if !single.contains('=') {
                return self.show_page(operator, single);
            }
        }

        let filter = match self.ctx.parser().parse(args, &[], true) {
            Ok(filter) => filter,
            Err(err) => return Response::error(format!("Error: {err}")),
        };
        let scope = Scope::new(filter, Some(position), unix_now());
        self.query_and_cache(operator, &scope, "Lookup results")
    }

    /// Everything within `radius` of the operator, regardless of age.
    pub fn near(&self, operator: &Operator, position: &WorldPos, args: &[&str]) -> Response {
        let max = self.ctx.config.max_radius;
        let radius = match args.first() {
            None => self.ctx.config.default_radius,
            Some(value) => match value.parse::<u32>() {
                Ok(radius) if (1..=max).contains(&radius) => radius,
                _ => return Response::error(format!("Radius must be between 1 and {max}.")),
            },
        };

        let scope = Scope::new(Filter::new().with_radius(radius), Some(position), unix_now());
        self.query_and_cache(operator, &scope, &format!("Changes within {radius} blocks"))
    }

    /// Parse the filter and hand it to the engine; `reply` fires on completion.
    pub fn rollback<F>(&self, position: &WorldPos, args: &[&str], direction: Direction, reply: F)
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let filter = match self.ctx.parser().parse(args, &[Field::Time], false) {
            Ok(filter) => filter,
            Err(err) => {
                reply(Response::error(format!("Error: {err}")));
                return;
            }
        };

        let started = Instant::now();
        let world = position.world.clone();
        let radius = filter.radius();
        let range = filter.time_since().unwrap_or_default();

        self.ctx
            .engine
            .execute_then(position.clone(), filter, direction, move |result| {
                let response = match result {
                    Ok(0) => Response::ok([format!("Nothing to {}.", direction.name())]),
                    Ok(affected) => Response::ok([
                        format!("{} completed for \"{world}\".", capitalize(direction.name())),
                        format!("Time taken: {:.2} seconds.", started.elapsed().as_secs_f64()),
                        format!("Radius: {}.", describe_radius(radius)),
                        format!("Approx. {affected} changes {}.", direction.past_tense()),
                        format!("Covering changes since {}.", time_ago(range)),
                    ]),
                    Err(err) => {
                        error!(target: ADMIN_TARGET, "{} in {world} failed: {err}", direction.name());
                        Response::error(err.user_message())
                    }
                };
                reply(response);
            });
    }

    /// Delete every record older than the given duration.
    pub fn purge(&self, args: &[&str]) -> Response {
        let [arg] = args else {
            return Response::error("Usage: purge t=<time>");
        };
        let value = arg
            .strip_prefix("t=")
            .or_else(|| arg.strip_prefix("time="))
            .unwrap_or(*arg);
        let seconds = match parse_duration(value) {
            Ok(seconds) => seconds,
            Err(err) => return Response::error(format!("Error: {err}")),
        };

        let started = Instant::now();
        let cutoff = unix_now().saturating_sub(i64::try_from(seconds).unwrap_or(i64::MAX));
        match self.ctx.store.purge_older_than(cutoff) {
            Ok(purged) => Response::ok([
                format!("Purged {purged} rows older than {}.", duration(seconds)),
                format!("Time taken: {:.2} seconds.", started.elapsed().as_secs_f64()),
            ]),
            Err(err) => {
                error!(target: ADMIN_TARGET, "Purge failed: {err}");
                Response::error("An error occurred while purging. Check the console.")
            }
        }
    }

    pub fn inspect(&self, operator: &Operator) -> Response {
        if self.ctx.sessions.toggle_inspector(operator) {
            Response::ok(["Inspector enabled.".to_string()])
        } else {
            Response::ok(["Inspector disabled.".to_string()])
        }
    }

    /// Full history of one position, for an inspector's click.
    pub fn inspect_block(&self, operator: &Operator, position: &WorldPos) -> Response {
        let scope = Scope::at(position);
        self.query_and_cache(operator, &scope, &format!("History at {}", position.pos))
    }

    /// Drop all session state of `operator`.
    pub fn end_session(&self, operator: &Operator) {
        self.ctx.sessions.end_session(operator);
    }

    fn query_and_cache(&self, operator: &Operator, scope: &Scope, title: &str) -> Response {
        let started = Instant::now();
        let mut records = match self.ctx.store.query(scope) {
            Ok(records) => records,
            Err(err) => {
                error!(target: ADMIN_TARGET, "Lookup failed: {err}");
                return Response::error("An error occurred while looking up. Check the console.");
            }
        };
        if records.is_empty() {
            return Response::ok(["No data found.".to_string()]);
        }

        // newest first
        records.reverse();
        self.ctx.sessions.cache().store(operator, records);

        let mut response = self.render_page(operator, 1, self.ctx.config.lookup_page_size, title);
        if response.success {
            response.lines.push(format!(
                "Time taken: {:.2} seconds.",
                started.elapsed().as_secs_f64()
            ));
        }
        response
    }

    fn show_page(&self, operator: &Operator, spec: &str) -> Response {
        let (page, lines) = match spec.split_once(':') {
            Some((page, lines)) => (page.parse::<usize>(), lines.parse::<usize>()),
            None => (spec.parse::<usize>(), Ok(self.ctx.config.lookup_page_size)),
        };
        let (Ok(page), Ok(lines)) = (page, lines) else {
            return Response::error(format!("Invalid page '{spec}' (expected <page>[:<lines>])."));
        };
        self.render_page(operator, page, lines, "Lookup results")
    }

    fn render_page(&self, operator: &Operator, index: usize, size: usize, title: &str) -> Response {
        let page = match self.ctx.sessions.cache().page(operator, index, size) {
            Ok(page) => page,
            Err(PageError::NothingCached) => {
                return Response::error("Nothing cached. Run a lookup first.");
            }
            Err(PageError::OutOfRange { last, .. }) => {
                return Response::error(format!("Page must be between 1 and {last}."));
            }
            Err(PageError::ZeroPageSize) => {
                return Response::error("Lines per page must be at least 1.");
            }
        };

        let now = unix_now();
        let mut lines = Vec::with_capacity(page.records.len() + 2);
        lines.push(format!("----- {title} -----"));
        lines.extend(page.records.iter().map(|record| self.describe(record, now)));
        lines.push(format!(
            "Page {}/{} ({} results)",
            page.index, page.last, page.total
        ));
        Response::ok(lines)
    }

    fn describe(&self, record: &ChangeRecord, now: i64) -> String {
        let subject = match record.action {
            Action::ContainerSlotChange => format!(
                "{} -> {}",
                self.describe_state(&record.old_state),
                self.describe_state(&record.new_state)
            ),
            Action::BlockBreak | Action::EntityDespawn | Action::EntityKill => {
                self.describe_state(&record.old_state)
            }
            _ => self.describe_state(&record.new_state),
        };
        let linked = record
            .linked_position
            .map(|pos| format!(" and {pos}"))
            .unwrap_or_default();
        let marker = if record.rolled_back { " (rolled back)" } else { "" };
        format!(
            "{} - {} {} {} at {} {}{}{}",
            time_ago(age(record.timestamp, now)),
            record.actor,
            record.action.verb(),
            subject,
            record.world,
            record.pos,
            linked,
            marker
        )
    }

    fn describe_state(&self, state: &State) -> String {
        match state {
            State::Block(block) if block.meta == 0 => self.ctx.blocks.name_of(block.id),
            State::Block(block) => format!("{}:{}", self.ctx.blocks.name_of(block.id), block.meta),
            State::Slot { item, .. } if item.count == 0 => "empty".to_string(),
            State::Slot { item, .. } => {
                format!("{} x {}", item.count, self.ctx.blocks.name_of(item.id))
            }
            State::Entity(entity) => entity.kind.clone(),
            State::Absent => "nothing".to_string(),
        }
    }
}

fn describe_radius(radius: Option<u32>) -> String {
    match radius {
        Some(radius) => format!("{radius} blocks"),
        None => "global".to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
