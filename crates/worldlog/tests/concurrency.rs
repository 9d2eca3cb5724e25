mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Event, InstrumentedStore, block_change};
use worldlog::time::unix_now;
use worldlog::{
    Action, Backend, BlockPos, BlockState, ChangeLogStore, Direction, EngineError, Filter,
    MemoryWorld, RollbackEngine, WorldPos,
};

fn seed(store: &InstrumentedStore, world: &str) {
    for x in 0..3 {
        store
            .append(block_change(
                world,
                BlockPos::new(x, 64, 0),
                unix_now() - 10,
                Action::BlockPlace,
                BlockState::AIR,
                BlockState::new(1, 0),
            ))
            .unwrap();
    }
}

fn filter() -> Filter {
    Filter::new().with_time_since(600)
}

#[test]
fn test_same_world_is_rejected_while_in_flight() {
    let store = Arc::new(
        InstrumentedStore::new(Backend::MultiWriter).with_delay(Duration::from_millis(300)),
    );
    seed(&store, "world");
    let engine = RollbackEngine::new(store.clone(), Arc::new(MemoryWorld::new()));
    let origin = WorldPos::new("world", 0, 64, 0);

    let first = engine.execute(origin.clone(), filter(), Direction::Rollback);
    assert!(engine.is_busy("world"));

    let second = engine.execute(origin.clone(), filter(), Direction::Restore);
    assert_eq!(
        second.wait(),
        Err(EngineError::ConcurrentOperationInProgress {
            world: "world".into()
        })
    );

    assert_eq!(first.wait(), Ok(3));
    assert!(!engine.is_busy("world"));

    // once the first finished the world is free again
    let third = engine.execute(origin, filter(), Direction::Restore);
    assert_eq!(third.wait(), Ok(3));

    // mutate_batch calls never overlapped
    let events = store.events();
    assert_eq!(
        events,
        vec![
            Event::Enter("world".into()),
            Event::Exit("world".into()),
            Event::Enter("world".into()),
            Event::Exit("world".into()),
        ]
    );
}

#[test]
fn test_different_worlds_run_in_parallel() {
    // Each mutate_batch waits until both are inside; a serialized engine
    // would time out here.
    let store = Arc::new(InstrumentedStore::new(Backend::MultiWriter).with_rendezvous(2));
    seed(&store, "world");
    seed(&store, "nether");
    let engine = RollbackEngine::new(store.clone(), Arc::new(MemoryWorld::new()));

    let overworld = engine.execute(WorldPos::new("world", 0, 64, 0), filter(), Direction::Rollback);
    let nether = engine.execute(WorldPos::new("nether", 0, 64, 0), filter(), Direction::Rollback);

    assert_eq!(overworld.wait(), Ok(3));
    assert_eq!(nether.wait(), Ok(3));
    assert!(!store.rendezvous_timed_out.load(Ordering::SeqCst));
}

#[test]
fn test_caller_is_not_blocked() {
    let store = Arc::new(
        InstrumentedStore::new(Backend::MultiWriter).with_delay(Duration::from_millis(500)),
    );
    seed(&store, "world");
    let engine = RollbackEngine::new(store.clone(), Arc::new(MemoryWorld::new()));

    let completion = engine.execute(WorldPos::new("world", 0, 64, 0), filter(), Direction::Rollback);
    assert!(completion.try_result().is_none());
    assert_eq!(
        completion.wait_timeout(Duration::from_secs(5)),
        Some(Ok(3))
    );
}
