//! LMDB change log store.
//!
//! LMDB allows a single write transaction at a time, so every operation is
//! funnelled to one writer thread that owns the environment:
//!
//! ```text
//! callers ──Request──▶ [ writer thread ]
//!    ▲                   ├─ long RwTxn (appends between batcher ticks)
//!    └──── reply ─────── └─ own RwTxn per mutate_batch / purge
//! ```
//!
//! Keys are big-endian record ids, so a cursor walks records in id order.
//! Values are `bincode`-encoded [`ChangeRecord`]s. A second database indexes
//! records by world and time; queries bound to a world seek into it from
//! their time cutoff, and purges walk its keys without decoding records.
//!
//! [`ChangeRecord`]: worldlog::ChangeRecord

mod writer;

use std::io;
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use heed::{Database, EnvOpenOptions, types::Bytes};
use thiserror::Error;
use worldlog::{
    Backend, ChangeLogStore, ChangeRecord, Direction, NewRecord, RecordId, Scope, StoreError,
    StoreResult, Timestamp,
};

use writer::{Request, Tables};

/// Default environment size: 1 GiB.
pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] io::Error),

    #[error("failed to open LMDB environment: {0}")]
    Heed(#[from] heed::Error),

    #[error("failed to index existing records: {0}")]
    Index(#[from] StoreError),
}

/// Single-writer [`ChangeLogStore`] on LMDB.
pub struct LmdbStore {
    requests: Option<Sender<Request>>,
    writer: Option<JoinHandle<()>>,
}

impl LmdbStore {
    /// Open or create a store at `path`.
    ///
    /// # Safety
    /// Uses unsafe to call heed's open, which requires that the same
    /// environment is not opened twice in one process.
    #[allow(unsafe_code)]
    pub fn open(path: impl AsRef<Path>, map_size: usize) -> Result<Self, OpenError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        // SAFETY: each store owns its directory exclusively
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let records: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some("records"))?;
        let by_time: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some("by_time"))?;
        wtxn.commit()?;
        let tables = Tables { records, by_time };

        let rtxn = env.read_txn()?;
        let last_id = records
            .last(&rtxn)?
            .and_then(|(key, _)| writer::decode_key(key))
            .unwrap_or(0);
        let unindexed = by_time.is_empty(&rtxn)? && !records.is_empty(&rtxn)?;
        drop(rtxn);

        if unindexed {
            let indexed = writer::rebuild_index(&env, tables)?;
            tracing::info!("Indexed {indexed} existing records by time");
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("worldlog-lmdb-writer".to_string())
            .spawn(move || writer::run(&env, tables, last_id, &rx))?;

        tracing::info!("Opened change log at {} (last id {last_id})", path.display());
        Ok(Self {
            requests: Some(tx),
            writer: Some(handle),
        })
    }

    fn call<T>(&self, make: impl FnOnce(Sender<StoreResult<T>>) -> Request) -> StoreResult<T> {
        let lost = || StoreError::ConnectionLost("writer thread stopped".to_string());
        let requests = self.requests.as_ref().ok_or_else(lost)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        requests.send(make(tx)).map_err(|_| lost())?;
        rx.recv().map_err(|_| lost())?
    }
}

impl ChangeLogStore for LmdbStore {
    fn backend(&self) -> Backend {
        Backend::SingleWriter
    }

    fn append(&self, record: NewRecord) -> StoreResult<RecordId> {
        self.call(|reply| Request::Append(record, reply))
    }

    fn query(&self, scope: &Scope) -> StoreResult<Vec<ChangeRecord>> {
        self.call(|reply| Request::Query(scope.clone(), reply))
    }

    fn mutate_batch(&self, ids: &[RecordId], direction: Direction) -> StoreResult<usize> {
        self.call(|reply| Request::MutateBatch(ids.to_vec(), direction, reply))
    }

    fn purge_older_than(&self, timestamp: Timestamp) -> StoreResult<usize> {
        self.call(|reply| Request::Purge(timestamp, reply))
    }

    fn begin_long_transaction(&self) -> StoreResult<()> {
        self.call(Request::Begin)
    }

    fn commit_and_reopen(&self) -> StoreResult<()> {
        self.call(Request::CommitAndReopen)
    }

    fn end_long_transaction(&self) -> StoreResult<()> {
        self.call(Request::End)
    }
}

impl Drop for LmdbStore {
    fn drop(&mut self) {
        // Closing the queue makes the writer commit and exit.
        drop(self.requests.take());
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                tracing::error!(target: worldlog::ADMIN_TARGET, "LMDB writer thread panicked");
            }
        }
    }
}
