use std::sync::Arc;
use std::thread;
use std::time::Duration;

use worldlog::time::unix_now;
use worldlog::{
    Action, Actor, Backend, BlockPos, BlockState, ChangeLogStore, Direction, Filter, MemoryWorld,
    NewRecord, RollbackEngine, Scope, State, StoreError, TransactionBatcher, WorldPos,
};
use worldlog_lmdb::{DEFAULT_MAP_SIZE, LmdbStore};

fn record(x: i32, timestamp: i64) -> NewRecord {
    NewRecord {
        timestamp,
        world: "world".into(),
        pos: BlockPos::new(x, 64, 0),
        action: Action::BlockPlace,
        actor: Actor::player("Steve"),
        old_state: State::Block(BlockState::AIR),
        new_state: State::Block(BlockState::new(1, 0)),
        linked_position: None,
    }
}

#[test]
fn test_append_and_query_in_id_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
    assert_eq!(store.backend(), Backend::SingleWriter);

    let ids: Vec<_> = (0..5)
        .map(|x| store.append(record(x, 100 - i64::from(x))).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    let all = store.query(&Scope::default()).unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
    assert_eq!(all[2].pos, BlockPos::new(2, 64, 0));
}

#[test]
fn test_reopen_keeps_records_and_ids() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
        store.append(record(0, 10)).unwrap();
        store.append(record(1, 20)).unwrap();
    }

    let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
    assert_eq!(store.query(&Scope::default()).unwrap().len(), 2);
    assert_eq!(store.append(record(2, 30)).unwrap(), 3);
}

#[test]
fn test_long_transaction_is_visible_and_committed_on_close() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
        store.begin_long_transaction().unwrap();
        store.append(record(0, 10)).unwrap();
        store.append(record(1, 20)).unwrap();
        // readers on the writer thread see the open transaction
        assert_eq!(store.query(&Scope::default()).unwrap().len(), 2);
        store.commit_and_reopen().unwrap();
        store.append(record(2, 30)).unwrap();
    }

    let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
    assert_eq!(store.query(&Scope::default()).unwrap().len(), 3);
}

#[test]
fn test_mutate_batch_checks_flags() {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
    store.begin_long_transaction().unwrap();
    let a = store.append(record(0, 10)).unwrap();
    let b = store.append(record(1, 20)).unwrap();

    assert_eq!(store.mutate_batch(&[a], Direction::Rollback), Ok(1));
    assert!(matches!(
        store.mutate_batch(&[b, a], Direction::Rollback),
        Err(StoreError::ConstraintViolation(_))
    ));
    assert!(matches!(
        store.mutate_batch(&[99], Direction::Rollback),
        Err(StoreError::ConstraintViolation(_))
    ));

    let flags: Vec<_> = store
        .query(&Scope::default())
        .unwrap()
        .into_iter()
        .map(|r| r.rolled_back)
        .collect();
    assert_eq!(flags, vec![true, false]);

    // the long transaction is back open for appends
    store.append(record(2, 30)).unwrap();
    store.end_long_transaction().unwrap();
    assert_eq!(store.query(&Scope::default()).unwrap().len(), 3);
}

#[test]
fn test_purge() {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
    for (x, t) in [(0, 10), (1, 20), (2, 30)] {
        store.append(record(x, t)).unwrap();
    }
    assert_eq!(store.purge_older_than(25), Ok(2));
    let left = store.query(&Scope::default()).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].timestamp, 30);
}

fn in_world(world: &str, since: Option<i64>) -> Scope {
    Scope {
        world: Some(world.to_string()),
        since,
        ..Scope::default()
    }
}

#[test]
fn test_time_bounded_query_over_many_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
    store.begin_long_transaction().unwrap();
    for t in 0..1000 {
        let world = if t % 2 == 0 { "world" } else { "nether" };
        store
            .append(NewRecord {
                world: world.into(),
                ..record(t % 7, i64::from(t))
            })
            .unwrap();
    }
    // an old timestamp appended late still sorts by time
    store.append(record(0, 3)).unwrap();

    let recent = store.query(&in_world("world", Some(980))).unwrap();
    let times: Vec<_> = recent.iter().map(|r| r.timestamp).collect();
    assert_eq!(times, (980..1000).step_by(2).collect::<Vec<_>>());
    assert!(recent.windows(2).all(|w| w[0].id < w[1].id));
    assert!(recent.iter().all(|r| r.world == "world"));

    let nether = store.query(&in_world("nether", Some(995))).unwrap();
    assert_eq!(nether.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![995, 997, 999]);

    assert_eq!(store.query(&in_world("world", None)).unwrap().len(), 501);
    assert!(store.query(&in_world("end", None)).unwrap().is_empty());

    store.commit_and_reopen().unwrap();
    assert_eq!(store.query(&in_world("world", Some(980))).unwrap().len(), 10);
    store.end_long_transaction().unwrap();
}

#[test]
fn test_purge_keeps_index_consistent() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
        for t in [-20, 10, 20, 30, 40] {
            store.append(record(0, t)).unwrap();
        }
        assert_eq!(store.purge_older_than(25), Ok(3));
        assert_eq!(
            store
                .query(&in_world("world", None))
                .unwrap()
                .iter()
                .map(|r| r.timestamp)
                .collect::<Vec<_>>(),
            vec![30, 40]
        );
        assert_eq!(store.purge_older_than(25), Ok(0));
    }

    let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
    assert_eq!(store.query(&in_world("world", Some(35))).unwrap().len(), 1);
    assert_eq!(store.append(record(1, 50)).unwrap(), 6);
    assert_eq!(store.query(&in_world("world", Some(35))).unwrap().len(), 2);
}

#[test]
fn test_rollback_with_batcher_running() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ChangeLogStore> =
        Arc::new(LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap());
    let batcher = TransactionBatcher::spawn(Arc::clone(&store), Duration::from_millis(10))
        .unwrap()
        .unwrap();

    let now = unix_now();
    for x in 0..4 {
        store.append(record(x, now - 5)).unwrap();
    }
    thread::sleep(Duration::from_millis(30));

    let world = Arc::new(MemoryWorld::new());
    let engine = RollbackEngine::new(Arc::clone(&store), world.clone());
    let origin = WorldPos::new("world", 0, 64, 0);
    let filter = Filter::new().with_time_since(60).with_radius(10);

    assert_eq!(
        engine
            .execute(origin.clone(), filter.clone(), Direction::Rollback)
            .wait(),
        Ok(4)
    );
    assert_eq!(world.edit_log().len(), 4);
    assert_eq!(
        engine.execute(origin, filter, Direction::Rollback).wait(),
        Ok(0)
    );

    batcher.shutdown();
}
