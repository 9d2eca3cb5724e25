//! Console runner for the change log.
//!
//! This binary:
//! 1. Loads the config from `WORLDLOG_CONFIG` (defaults if unset)
//! 2. Opens the configured store and starts the transaction batcher
//! 3. Simulates one operator in an in-memory world, reading commands from stdin
//!
//! Besides the operator commands (`lookup`, `near`, `rollback`, `restore`,
//! `purge`, `inspect`) the console understands:
//! - `as <name>` - act as another operator
//! - `tp <world> <x> <y> <z>` - move the operator
//! - `place <block>` / `break` / `click` - change the block under the operator
//! - `logout` - end the current operator's session
//! - `q` or `quit` - shut down

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing::{info, warn};
use worldlog::{
    Actor, BackendKind, BlockState, ChangeLogStore, Commands, Config, Context, MemoryStore,
    MemoryWorld, Operator, Response, TransactionBatcher, WorldPos,
};
use worldlog_lmdb::LmdbStore;

/// Where the simulated operator is and who they are.
struct Session {
    operator: Operator,
    position: WorldPos,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("worldlog=info".parse()?)
                .add_directive("worldlog_lmdb=info".parse()?)
                .add_directive("worldlog_runner=info".parse()?),
        )
        .init();

    let config = match std::env::var("WORLDLOG_CONFIG") {
        Ok(path) => {
            info!("Loading config from {path}");
            Config::load(&path)?
        }
        Err(_) => Config::default(),
    };

    let store: Arc<dyn ChangeLogStore> = match config.backend {
        BackendKind::Lmdb => {
            let map_size = config
                .map_size_bytes()
                .ok_or_else(|| eyre::eyre!("map_size_mb {} is too large", config.map_size_mb))?;
            Arc::new(LmdbStore::open(&config.database_path, map_size)?)
        }
        BackendKind::Memory => Arc::new(MemoryStore::new()),
    };
    let batcher = TransactionBatcher::spawn(Arc::clone(&store), config.transaction_interval())?;

    let world = Arc::new(MemoryWorld::new());
    let commands = Commands::new(Arc::new(Context::new(config, store, world.clone())));

    let mut session = Session {
        operator: Operator::new("console"),
        position: WorldPos::new("world", 0, 64, 0),
    };

    info!("Ready, type 'help' for commands");
    print_prompt();

    for line in io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if matches!(line, "q" | "quit" | "exit") {
            break;
        }
        if !line.is_empty() {
            handle(&commands, &world, &mut session, line);
        }
        print_prompt();
    }

    info!("Shutting down...");
    if let Some(batcher) = batcher {
        batcher.shutdown();
    }
    Ok(())
}

fn handle(commands: &Commands, world: &MemoryWorld, session: &mut Session, line: &str) {
    let words: Vec<&str> = line.split_whitespace().collect();
    let actor = Actor::player(session.operator.name());
    let at = session.position.clone();
    let ctx = commands.context();

    match words.as_slice() {
        ["help" | "h" | "?"] => print_help(),
        ["as", name] => {
            session.operator = Operator::new(*name);
            info!("Acting as {name}");
        }
        ["logout"] => commands.end_session(&session.operator),
        ["tp", world_name, x, y, z] => match (x.parse(), y.parse(), z.parse()) {
            (Ok(x), Ok(y), Ok(z)) => session.position = WorldPos::new(*world_name, x, y, z),
            _ => warn!("Coordinates must be whole numbers"),
        },
        ["place", block] => match ctx.blocks.parse_spec(block) {
            Some(spec) => {
                let Some(placed) = spec.to_state() else {
                    warn!("Aux value of '{block}' does not fit a block state");
                    return;
                };
                let replaced = world.block(&at.world, at.pos);
                world.set_block(&at.world, at.pos, placed);
                ctx.recorder.block_place(&actor, &at, replaced, placed);
            }
            None => warn!("Unknown block '{block}'"),
        },
        ["break"] => {
            let broken = world.block(&at.world, at.pos);
            if broken == BlockState::AIR {
                warn!("Nothing to break at {at}");
            } else {
                world.set_block(&at.world, at.pos, BlockState::AIR);
                ctx.recorder.block_break(&actor, &at, broken);
            }
        }
        ["click"] => {
            if ctx.sessions.is_inspector(&session.operator) {
                print_response(&commands.inspect_block(&session.operator, &at));
            } else {
                ctx.recorder
                    .block_click(&actor, &at, world.block(&at.world, at.pos));
            }
        }
        _ => commands.dispatch(&session.operator, &at, line, |response| {
            print_response(&response);
        }),
    }
}

#[allow(clippy::print_stdout)]
fn print_response(response: &Response) {
    let mut stdout = io::stdout().lock();
    for line in &response.lines {
        writeln!(stdout, "\r{line}").ok();
    }
    stdout.flush().ok();
}

#[allow(clippy::print_stdout)]
fn print_help() {
    println!("Commands:");
    println!("  lookup <filter> | lookup [<page>[:<lines>]]");
    println!("  near [radius]");
    println!("  rollback t=<time> [r= u= a= b= e=]");
    println!("  restore t=<time> [r= u= a= b= e=]");
    println!("  purge t=<time>");
    println!("  inspect, click");
    println!("  as <name>, tp <world> <x> <y> <z>, place <block>, break, logout");
    println!("  q, quit");
}

#[allow(clippy::print_stdout)]
fn print_prompt() {
    print!("\r> ");
    io::stdout().flush().ok();
}
