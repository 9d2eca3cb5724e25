//! In-memory multi-writer store.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rayon::prelude::*;

use super::{Backend, ChangeLogStore, StoreResult, check_batch};
use crate::filter::Scope;
use crate::record::{ChangeRecord, Direction, NewRecord, RecordId, Timestamp};

/// Change log held entirely in memory.
///
/// Every operation is atomic under one lock, so it behaves like a
/// multi-writer backend and never needs the transaction batcher.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordId, ChangeRecord>,
    next_id: RecordId,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch one record by id.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<ChangeRecord> {
        self.inner.read().records.get(&id).cloned()
    }
}

impl ChangeLogStore for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::MultiWriter
    }

    fn append(&self, record: NewRecord) -> StoreResult<RecordId> {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.records.insert(id, record.into_record(id));
        tracing::trace!("Appended record {id}");
        Ok(id)
    }

    fn query(&self, scope: &Scope) -> StoreResult<Vec<ChangeRecord>> {
        let inner = self.inner.read();
        let mut matched: Vec<ChangeRecord> = inner
            .records
            .par_iter()
            .filter(|(_, record)| scope.matches(record))
            .map(|(_, record)| record.clone())
            .collect();
        matched.sort_unstable_by_key(|record| record.id);
        tracing::debug!("Query matched {} of {} records", matched.len(), inner.records.len());
        Ok(matched)
    }

    fn mutate_batch(&self, ids: &[RecordId], direction: Direction) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        check_batch(ids, direction, |id| {
            Ok(inner.records.get(&id).map(|record| record.rolled_back))
        })?;

        for id in ids {
            if let Some(record) = inner.records.get_mut(id) {
                record.rolled_back = direction.resulting_flag();
            }
        }
        tracing::debug!("{} flipped {} records", direction.name(), ids.len());
        Ok(ids.len())
    }

    fn purge_older_than(&self, timestamp: Timestamp) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        let before = inner.records.len();
        inner.records.retain(|_, record| record.timestamp >= timestamp);
        Ok(before - inner.records.len())
    }
}
