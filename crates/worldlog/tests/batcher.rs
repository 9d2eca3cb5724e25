mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::{Event, InstrumentedStore};
use worldlog::{Backend, TransactionBatcher};

#[test]
fn test_commits_every_tick_and_on_shutdown() {
    let store = Arc::new(InstrumentedStore::new(Backend::SingleWriter));
    let batcher = TransactionBatcher::spawn(store.clone(), Duration::from_millis(20))
        .unwrap()
        .unwrap();

    thread::sleep(Duration::from_millis(150));
    batcher.shutdown();

    let events = store.events();
    assert_eq!(events.first(), Some(&Event::Begin));
    assert_eq!(events.last(), Some(&Event::End));
    let commits = events.iter().filter(|e| **e == Event::Commit).count();
    assert!(commits >= 2, "only {commits} commits in {events:?}");
    assert_eq!(events.iter().filter(|e| **e == Event::End).count(), 1);
}

#[test]
fn test_commit_failure_reopens_next_tick() {
    let store = Arc::new(InstrumentedStore::new(Backend::SingleWriter));
    store.fail_commits.store(1, Ordering::SeqCst);
    let batcher = TransactionBatcher::spawn(store.clone(), Duration::from_millis(20))
        .unwrap()
        .unwrap();

    thread::sleep(Duration::from_millis(200));
    drop(batcher);

    let events = store.events();
    // initial begin plus the reopen after the failed commit
    assert_eq!(events.iter().filter(|e| **e == Event::Begin).count(), 2);
    assert!(events.contains(&Event::Commit));
    assert_eq!(events.last(), Some(&Event::End));
}

#[test]
fn test_not_started_for_multi_writer() {
    let store = Arc::new(InstrumentedStore::new(Backend::MultiWriter));
    let batcher = TransactionBatcher::spawn(store.clone(), Duration::from_millis(20)).unwrap();
    assert!(batcher.is_none());
    assert!(store.events().is_empty());
}
