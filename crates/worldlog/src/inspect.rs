//! Per-operator lookup results and inspector sessions.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::record::ChangeRecord;

/// Identifies an operator session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Operator(String);

impl Operator {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("nothing cached")]
    NothingCached,

    /// Pages are 1-indexed; `last` is the highest valid page.
    #[error("page {requested} is out of range, valid pages are 1-{last}")]
    OutOfRange { requested: usize, last: usize },

    #[error("page size must be at least 1")]
    ZeroPageSize,
}

/// One page of cached results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    /// 1-indexed page number.
    pub index: usize,
    pub last: usize,
    /// Total cached records.
    pub total: usize,
    pub records: Vec<ChangeRecord>,
}

/// Last lookup result per operator.
#[derive(Default)]
pub struct InspectionCache {
    entries: RwLock<HashMap<Operator, Arc<[ChangeRecord]>>>,
}

impl InspectionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was cached for `operator`.
    pub fn store(&self, operator: &Operator, records: Vec<ChangeRecord>) {
        self.entries
            .write()
            .insert(operator.clone(), Arc::from(records));
    }

    #[must_use]
    pub fn get(&self, operator: &Operator) -> Option<Arc<[ChangeRecord]>> {
        self.entries.read().get(operator).cloned()
    }

    pub fn remove(&self, operator: &Operator) {
        self.entries.write().remove(operator);
    }

    /// Slice `page_index` (1-indexed) out of the cached records.
    ///
    /// An empty cache entry has exactly one (empty) page.
    pub fn page(
        &self,
        operator: &Operator,
        page_index: usize,
        page_size: usize,
    ) -> Result<Page, PageError> {
        if page_size == 0 {
            return Err(PageError::ZeroPageSize);
        }
        let records = self.get(operator).ok_or(PageError::NothingCached)?;
        let last = records.len().div_ceil(page_size).max(1);
        if page_index < 1 || page_index > last {
            return Err(PageError::OutOfRange {
                requested: page_index,
                last,
            });
        }

        let start = (page_index - 1) * page_size;
        let end = (start + page_size).min(records.len());
        Ok(Page {
            index: page_index,
            last,
            total: records.len(),
            records: records[start..end].to_vec(),
        })
    }
}

/// Operator session state: cached lookups and inspector mode.
#[derive(Default)]
pub struct SessionRegistry {
    cache: InspectionCache,
    inspectors: RwLock<HashSet<Operator>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cache(&self) -> &InspectionCache {
        &self.cache
    }

    /// Flip inspector mode; returns the new state.
    pub fn toggle_inspector(&self, operator: &Operator) -> bool {
        let mut inspectors = self.inspectors.write();
        if inspectors.remove(operator) {
            false
        } else {
            inspectors.insert(operator.clone());
            true
        }
    }

    #[must_use]
    pub fn is_inspector(&self, operator: &Operator) -> bool {
        self.inspectors.read().contains(operator)
    }

    /// Tear down everything held for `operator`.
    pub fn end_session(&self, operator: &Operator) {
        self.cache.remove(operator);
        self.inspectors.write().remove(operator);
        tracing::debug!("Ended session of {operator}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Action, Actor, BlockPos, BlockState, NewRecord, State};

    fn records(n: u64) -> Vec<ChangeRecord> {
        (1..=n)
            .map(|id| {
                NewRecord {
                    timestamp: 0,
                    world: "world".into(),
                    pos: BlockPos::new(0, 0, 0),
                    action: Action::BlockPlace,
                    actor: Actor::player("Steve"),
                    old_state: State::Block(BlockState::AIR),
                    new_state: State::Block(BlockState::new(1, 0)),
                    linked_position: None,
                }
                .into_record(id)
            })
            .collect()
    }

    fn ids(page: &Page) -> Vec<u64> {
        page.records.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_pages_of_four() {
        let cache = InspectionCache::new();
        let op = Operator::new("alex");
        cache.store(&op, records(10));

        assert_eq!(ids(&cache.page(&op, 1, 4).unwrap()), vec![1, 2, 3, 4]);
        assert_eq!(ids(&cache.page(&op, 2, 4).unwrap()), vec![5, 6, 7, 8]);
        let last = cache.page(&op, 3, 4).unwrap();
        assert_eq!(ids(&last), vec![9, 10]);
        assert_eq!(last.last, 3);
        assert_eq!(last.total, 10);

        assert_eq!(
            cache.page(&op, 4, 4),
            Err(PageError::OutOfRange {
                requested: 4,
                last: 3
            })
        );
        assert!(matches!(
            cache.page(&op, 0, 4),
            Err(PageError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_store_replaces() {
        let cache = InspectionCache::new();
        let op = Operator::new("alex");
        cache.store(&op, records(10));
        cache.store(&op, records(2));
        assert_eq!(cache.get(&op).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = InspectionCache::new();
        let op = Operator::new("alex");
        cache.remove(&op);
        cache.store(&op, records(1));
        cache.remove(&op);
        cache.remove(&op);
        assert!(cache.get(&op).is_none());
        assert_eq!(cache.page(&op, 1, 4), Err(PageError::NothingCached));
    }

    #[test]
    fn test_empty_entry_has_one_page() {
        let cache = InspectionCache::new();
        let op = Operator::new("alex");
        cache.store(&op, Vec::new());
        assert!(cache.page(&op, 1, 4).unwrap().records.is_empty());
    }

    #[test]
    fn test_session_teardown() {
        let sessions = SessionRegistry::new();
        let op = Operator::new("alex");
        assert!(sessions.toggle_inspector(&op));
        assert!(sessions.is_inspector(&op));
        sessions.cache().store(&op, records(3));

        sessions.end_session(&op);
        assert!(!sessions.is_inspector(&op));
        assert!(sessions.cache().get(&op).is_none());

        assert!(sessions.toggle_inspector(&op));
        assert!(!sessions.toggle_inspector(&op));
    }
}
