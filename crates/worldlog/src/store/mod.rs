//! Change log storage contract.
//!
//! The core never talks to a database directly; it goes through
//! [`ChangeLogStore`]. Two concurrency models are distinguished:
//!
//! - **Multi-writer** backends commit every append on its own.
//! - **Single-writer** backends (embedded databases) keep one long write
//!   transaction open across many appends; the
//!   [`TransactionBatcher`](crate::batcher::TransactionBatcher) commits and
//!   reopens it periodically.

mod memory;

use thiserror::Error;

pub use memory::MemoryStore;

use crate::filter::Scope;
use crate::record::{ChangeRecord, Direction, NewRecord, RecordId, Timestamp};

/// Storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend is unreachable or was shut down.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A record was not in the state the operation required.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The backend aborted the transaction.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Write concurrency model of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    SingleWriter,
    MultiWriter,
}

/// Append-only record store with scoped queries and batched flag updates.
pub trait ChangeLogStore: Send + Sync {
    /// Concurrency model of this store.
    fn backend(&self) -> Backend;

    /// Append a record and return its assigned id.
    fn append(&self, record: NewRecord) -> StoreResult<RecordId>;

    /// All records matching `scope`, in ascending id order.
    fn query(&self, scope: &Scope) -> StoreResult<Vec<ChangeRecord>>;

    /// Flip the `rolled_back` flag of every id in one transaction.
    ///
    /// Every id must exist and carry [`Direction::eligible_flag`]; otherwise
    /// nothing is changed and [`StoreError::ConstraintViolation`] is
    /// returned. Returns the number of records changed.
    fn mutate_batch(&self, ids: &[RecordId], direction: Direction) -> StoreResult<usize>;

    /// Delete every record older than `timestamp`.
    fn purge_older_than(&self, timestamp: Timestamp) -> StoreResult<usize>;

    /// Open the long-lived write transaction (single-writer backends).
    fn begin_long_transaction(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Commit the long-lived transaction and open a fresh one.
    fn commit_and_reopen(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Commit the long-lived transaction without reopening it.
    fn end_long_transaction(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Validate a batch against current flags before mutating anything.
///
/// `flag_of` returns the stored `rolled_back` flag of a record, or `None`
/// when it does not exist. Shared by store implementations so the
/// consistency rule is identical everywhere.
pub fn check_batch<F>(ids: &[RecordId], direction: Direction, mut flag_of: F) -> StoreResult<()>
where
    F: FnMut(RecordId) -> StoreResult<Option<bool>>,
{
    for &id in ids {
        match flag_of(id)? {
            None => {
                return Err(StoreError::ConstraintViolation(format!(
                    "record {id} does not exist"
                )));
            }
            Some(flag) if flag != direction.eligible_flag() => {
                return Err(StoreError::ConstraintViolation(format!(
                    "record {id} was already processed by a {}",
                    direction.name()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
